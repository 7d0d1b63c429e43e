use actix::Addr;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor, HealthStatus};

/// Serve `/metrics` and `/health` on `port`.
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    health: Addr<HealthMonitorActor>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(health.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Arc<Registry>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

/// 200 while healthy or degraded, 503 once any component is unhealthy.
async fn health_handler(health: web::Data<Addr<HealthMonitorActor>>) -> impl Responder {
    match health.send(GetSystemHealth).await {
        Ok(report) => {
            let mut response = match report.overall_status {
                HealthStatus::Unhealthy(_) => HttpResponse::ServiceUnavailable(),
                _ => HttpResponse::Ok(),
            };
            response.json(serde_json::json!({
                "service": "meal-fulfillment",
                "health": report,
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "Health monitor unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "service": "meal-fulfillment",
                "health": { "overall_status": { "status": "UNHEALTHY", "reason": "health monitor unreachable" } },
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::UpdateHealth;
    use crate::metrics::Metrics;
    use actix::Actor;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use prometheus::IntCounter;

    #[actix_web::test]
    async fn test_metrics_and_health_endpoints() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = Arc::new(Registry::new());
        let counter = IntCounter::new("probe_total", "probe").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let monitor = HealthMonitorActor::new(metrics, chrono::Duration::minutes(1)).start();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry.clone()))
                .app_data(web::Data::new(monitor.clone()))
                .route("/metrics", web::get().to(metrics_handler))
                .route("/health", web::get().to(health_handler)),
        )
        .await;

        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(String::from_utf8_lossy(&body).contains("probe_total 1"));

        let health: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(health["health"]["overall_status"]["status"], "HEALTHY");

        monitor
            .send(UpdateHealth {
                component: "outbox_relay".into(),
                status: HealthStatus::Unhealthy("circuit breaker open".into()),
                details: None,
            })
            .await
            .unwrap();
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
