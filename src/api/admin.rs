use actix::Addr;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::actors::{DlqActor, GetDlqMessages, GetDlqStats};
use crate::domain::principal::Principal;
use crate::fulfillment::{AdminCancel, EngineError, FulfillmentEngine};

// ============================================================================
// Admin, driver and subscription endpoints
// ============================================================================

type Engine = web::Data<FulfillmentEngine>;

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub online: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn admin_cancel(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: Option<web::Json<AdminCancel>>,
) -> Result<HttpResponse, EngineError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let order = engine.admin_cancel(principal, path.into_inner(), request).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn soft_delete(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let order = engine.soft_delete(principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn set_driver_availability(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: web::Json<AvailabilityBody>,
) -> Result<HttpResponse, EngineError> {
    let driver = engine
        .set_driver_availability(principal, path.into_inner(), body.online)
        .await?;
    Ok(HttpResponse::Ok().json(driver))
}

pub async fn subscription_balance(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let subscription = engine.subscription_balance(principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "remaining_vouchers": subscription.remaining(),
        "subscription": subscription,
    })))
}

/// Parked effects, newest first, for manual intervention.
pub async fn dead_letters(
    dlq: web::Data<Addr<DlqActor>>,
    principal: Principal,
    query: web::Query<DeadLetterQuery>,
) -> Result<HttpResponse, EngineError> {
    if !principal.is_admin() {
        return Err(EngineError::Forbidden(format!("{principal} may not inspect dead letters")));
    }

    let limit = query.limit.min(500);
    let letters = dlq
        .send(GetDlqMessages { limit })
        .await
        .map_err(|e| EngineError::Store(anyhow::anyhow!("DLQ actor unreachable: {}", e)))?
        .map_err(|e| EngineError::Store(anyhow::anyhow!(e)))?;
    let stats = dlq
        .send(GetDlqStats)
        .await
        .map_err(|e| EngineError::Store(anyhow::anyhow!("DLQ actor unreachable: {}", e)))?
        .map_err(|e| EngineError::Store(anyhow::anyhow!(e)))?;

    let messages: Vec<serde_json::Value> = letters
        .into_iter()
        .map(|letter| {
            let payload = serde_json::from_str::<serde_json::Value>(&letter.message.payload)
                .unwrap_or(serde_json::Value::String(letter.message.payload.clone()));
            serde_json::json!({
                "id": letter.message.id,
                "order_id": letter.message.aggregate_id,
                "correlation_id": letter.message.correlation_id,
                "kind": letter.message.kind,
                "payload": payload,
                "attempts": letter.message.attempts,
                "error": letter.error,
                "failed_at": letter.failed_at,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "stats": stats,
        "messages": messages,
    })))
}
