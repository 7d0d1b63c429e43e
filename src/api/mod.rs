use actix::Addr;
use actix_web::{web, App, HttpServer};

use crate::actors::DlqActor;
use crate::fulfillment::FulfillmentEngine;

// ============================================================================
// HTTP API
// ============================================================================
//
// JSON over actix-web. Every handler takes the caller as a `Principal`
// extractor and returns `EngineError` on failure, which renders as
// {"kind", "message"} with the matching status code.
//
// ============================================================================

mod admin;
mod error;
mod orders;
mod principal;

pub use principal::{ID_HEADER, ROLE_HEADER, UID_HEADER};

/// Route table. Callers register `web::Data<FulfillmentEngine>` (and
/// `web::Data<Addr<DlqActor>>` for the dead-letter view).
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(error::json_config())
        .app_data(error::path_config())
        .service(
            web::scope("/orders")
                .route("", web::post().to(orders::place_order))
                .route("/{id}", web::get().to(orders::get_order))
                .route("/{id}/status", web::post().to(orders::change_status))
                .route("/{id}/cancel", web::post().to(orders::cancel_order))
                .route("/{id}/driver", web::post().to(orders::assign_driver))
                .route("/{id}/delivery/{milestone}", web::post().to(orders::delivery_progress))
                .route("/{id}/refund", web::post().to(orders::request_refund))
                .route("/{id}/refund/decision", web::post().to(orders::decide_refund)),
        )
        .service(
            web::scope("/admin")
                .route("/orders/{id}/cancel", web::post().to(admin::admin_cancel))
                .route("/orders/{id}", web::delete().to(admin::soft_delete))
                .route("/dead-letters", web::get().to(admin::dead_letters)),
        )
        .route("/drivers/{id}/availability", web::post().to(admin::set_driver_availability))
        .route("/subscriptions/{id}", web::get().to(admin::subscription_balance));
}

/// Serve the order API on `bind` until the server is stopped.
pub async fn start_api_server(
    engine: FulfillmentEngine,
    dlq: Addr<DlqActor>,
    bind: String,
) -> std::io::Result<()> {
    tracing::info!("🌐 Starting order API on http://{}", bind);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(engine.clone()))
            .app_data(web::Data::new(dlq.clone()))
            .configure(configure)
    })
    .bind(bind)?
    .run()
    .await
}
