use actix::prelude::*;
use anyhow::Context;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meal_fulfillment::actors::{CoordinatorActor, GetDlq, GetHealthMonitor, Shutdown};
use meal_fulfillment::api::start_api_server;
use meal_fulfillment::config::{AppConfig, StorageBackend};
use meal_fulfillment::domain::timing::{ServiceClock, SystemClock};
use meal_fulfillment::fulfillment::FulfillmentEngine;
use meal_fulfillment::metrics::{self, Metrics};
use meal_fulfillment::store::{schema, MemoryBackend, ScyllaBackend, Stores};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meal_fulfillment=debug"))
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(storage = ?config.storage, offset = %config.service_offset, "🚀 Starting meal fulfillment service");

    // === 1. Metrics and service clock ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let clock: Arc<dyn ServiceClock> = Arc::new(SystemClock::new(config.service_offset));

    // === 2. Storage ===
    let stores: Stores = match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory backend; state is lost on exit");
            let backend = MemoryBackend::new();
            backend.seed_demo(clock.today()).await;
            backend.stores()
        }
        StorageBackend::Scylla => {
            tracing::info!(nodes = ?config.scylla_nodes, "Connecting to ScyllaDB...");
            let session: Session = SessionBuilder::new()
                .known_nodes(&config.scylla_nodes)
                .build()
                .await
                .context("failed to connect to ScyllaDB")?;

            schema::ensure_schema(&session, &config.scylla_keyspace, 1).await?;
            ScyllaBackend::stores(Arc::new(session))
        }
    };

    // === 3. Engine and background workers ===
    let engine = FulfillmentEngine::new(stores, config.engine_settings(), clock, metrics.clone());

    tracing::info!("Starting coordinator actor with supervision");
    let coordinator = CoordinatorActor::new(engine.effects(), config.relay_settings()).start();
    let health_monitor = coordinator
        .send(GetHealthMonitor)
        .await?
        .context("health monitor was not started by the coordinator")?;
    let dlq = coordinator
        .send(GetDlq)
        .await?
        .context("DLQ actor was not started by the coordinator")?;

    // === 4. HTTP servers ===
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_server = metrics::start_metrics_server(metrics_registry, health_monitor, config.metrics_port);
    let api_server = start_api_server(engine, dlq, config.http_bind.clone());

    let result = tokio::select! {
        r = api_server => r.context("order API stopped"),
        r = metrics_server => r.context("metrics server stopped"),
    };

    // === 5. Graceful shutdown ===
    tracing::info!("Shutting down background workers");
    if let Err(e) = coordinator.send(Shutdown).await? {
        tracing::warn!(error = %e, "Coordinator shutdown reported an error");
    }

    result
}
