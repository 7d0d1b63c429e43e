use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::HealthStatus;
use crate::fulfillment::EffectExecutor;
use super::{DlqActor, GetSystemHealth, HealthMonitorActor, OutboxRelay, RelaySettings, UpdateHealth};

// ============================================================================
// Coordinator Actor - Orchestrates all system actors
// ============================================================================
//
// Responsibilities:
// - Manages lifecycle of child actors
// - Re-reports liveness of children that do not report themselves
// - Coordinates graceful shutdown
//
// Actor Hierarchy:
//   CoordinatorActor (Supervisor)
//   ├── OutboxRelay
//   ├── DlqActor
//   └── HealthMonitorActor
//
// ============================================================================

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct CoordinatorActor {
    executor: Arc<EffectExecutor>,
    relay_settings: RelaySettings,
    outbox_relay: Option<Addr<OutboxRelay>>,
    health_monitor: Option<Addr<HealthMonitorActor>>,
    dlq_actor: Option<Addr<DlqActor>>,
}

impl CoordinatorActor {
    pub fn new(executor: Arc<EffectExecutor>, relay_settings: RelaySettings) -> Self {
        Self {
            executor,
            relay_settings,
            outbox_relay: None,
            health_monitor: None,
            dlq_actor: None,
        }
    }

    fn start_child_actors(&mut self, _ctx: &mut Context<Self>) {
        tracing::info!("Starting supervised child actors");

        let metrics = self.executor.metrics().clone();

        // Children re-report at least every HEALTH_LOG_INTERVAL.
        let stale_after = chrono::Duration::from_std(HEALTH_LOG_INTERVAL * 3)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        let health_monitor = HealthMonitorActor::new(metrics.clone(), stale_after).start();
        self.health_monitor = Some(health_monitor.clone());

        let dlq_actor = DlqActor::new(self.executor.outbox().clone(), metrics).start();
        self.dlq_actor = Some(dlq_actor.clone());

        health_monitor.do_send(UpdateHealth {
            component: "dlq_actor".to_string(),
            status: HealthStatus::Healthy,
            details: Some("DLQ actor started".to_string()),
        });

        let outbox_relay = OutboxRelay::new(
            self.executor.clone(),
            dlq_actor,
            Some(health_monitor),
            self.relay_settings.clone(),
        )
        .start();
        self.outbox_relay = Some(outbox_relay);

        tracing::info!("✅ All supervised actors started successfully");
    }

    fn check_children(&self) {
        let Some(health_monitor) = self.health_monitor.clone() else {
            return;
        };

        let dlq_status = match &self.dlq_actor {
            Some(addr) if addr.connected() => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy("DLQ actor stopped".to_string()),
        };
        health_monitor.do_send(UpdateHealth {
            component: "dlq_actor".to_string(),
            status: dlq_status,
            details: None,
        });

        if !self.outbox_relay.as_ref().is_some_and(|addr| addr.connected()) {
            health_monitor.do_send(UpdateHealth {
                component: "outbox_relay".to_string(),
                status: HealthStatus::Unhealthy("outbox relay stopped".to_string()),
                details: None,
            });
        }

        actix::spawn(async move {
            match health_monitor.send(GetSystemHealth).await {
                Ok(health) => match health.overall_status {
                    HealthStatus::Healthy => {
                        tracing::debug!("System health check: Healthy");
                    }
                    HealthStatus::Degraded(ref msg) => {
                        tracing::warn!("System health check: Degraded - {}", msg);
                    }
                    HealthStatus::Unhealthy(ref msg) => {
                        tracing::error!("System health check: Unhealthy - {}", msg);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to get system health: {}", e);
                }
            }
        });
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("🎯 CoordinatorActor started - order fulfillment background workers");
        self.start_child_actors(ctx);
        ctx.run_interval(HEALTH_LOG_INTERVAL, |act, _ctx| act.check_children());
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("🛑 CoordinatorActor stopping - initiating graceful shutdown");
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 CoordinatorActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "Result<(), String>")]
pub struct Shutdown;

/// Address of the health monitor, for the `/health` endpoint.
#[derive(Message)]
#[rtype(result = "Option<Addr<HealthMonitorActor>>")]
pub struct GetHealthMonitor;

/// Address of the DLQ, for the admin dead-letter endpoints.
#[derive(Message)]
#[rtype(result = "Option<Addr<DlqActor>>")]
pub struct GetDlq;

impl Handler<Shutdown> for CoordinatorActor {
    type Result = Result<(), String>;

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("Received shutdown signal");

        // The relay goes first so nothing new reaches the DLQ mid-shutdown.
        if let Some(ref outbox_relay) = self.outbox_relay {
            outbox_relay.do_send(StopActor);
        }

        if let Some(ref dlq_actor) = self.dlq_actor {
            dlq_actor.do_send(StopActor);
        }

        if let Some(ref health_monitor) = self.health_monitor {
            health_monitor.do_send(StopActor);
        }

        ctx.stop();

        Ok(())
    }
}

impl Handler<GetHealthMonitor> for CoordinatorActor {
    type Result = Option<Addr<HealthMonitorActor>>;

    fn handle(&mut self, _msg: GetHealthMonitor, _ctx: &mut Self::Context) -> Self::Result {
        self.health_monitor.clone()
    }
}

impl Handler<GetDlq> for CoordinatorActor {
    type Result = Option<Addr<DlqActor>>;

    fn handle(&mut self, _msg: GetDlq, _ctx: &mut Self::Context) -> Self::Result {
        self.dlq_actor.clone()
    }
}

/// Message to gracefully stop an actor
#[derive(Message)]
#[rtype(result = "()")]
struct StopActor;

impl Handler<StopActor> for OutboxRelay {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("OutboxRelay received stop signal");
        ctx.stop();
    }
}

impl Handler<StopActor> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("HealthMonitorActor received stop signal");
        ctx.stop();
    }
}

impl Handler<StopActor> for DlqActor {
    type Result = ();

    fn handle(&mut self, _: StopActor, ctx: &mut Self::Context) {
        tracing::info!("DlqActor received stop signal");
        ctx.stop();
    }
}
