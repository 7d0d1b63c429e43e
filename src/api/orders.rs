use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::principal::Principal;
use crate::fulfillment::{EngineError, FulfillmentEngine, PlaceOrderRequest, RefundDecision};

// ============================================================================
// Order endpoints
// ============================================================================

type Engine = web::Data<FulfillmentEngine>;

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeBody {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignDriverBody {
    /// Rotation picks the driver when absent.
    #[serde(default)]
    pub driver_id: Option<Uuid>,
}

fn reason_of(body: Option<web::Json<ReasonBody>>) -> Option<String> {
    body.and_then(|b| b.into_inner().reason)
}

pub async fn place_order(
    engine: Engine,
    principal: Principal,
    body: web::Json<PlaceOrderRequest>,
) -> Result<HttpResponse, EngineError> {
    let order = engine.place_order(principal, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(order))
}

pub async fn get_order(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let order = engine.get_order(principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn change_status(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: web::Json<StatusChangeBody>,
) -> Result<HttpResponse, EngineError> {
    let StatusChangeBody { status, reason } = body.into_inner();
    let order = engine
        .transition_status(principal, path.into_inner(), &status, reason)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn cancel_order(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: Option<web::Json<ReasonBody>>,
) -> Result<HttpResponse, EngineError> {
    let order = engine
        .cancel_order(principal, path.into_inner(), reason_of(body))
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn assign_driver(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: Option<web::Json<AssignDriverBody>>,
) -> Result<HttpResponse, EngineError> {
    let driver_id = body.and_then(|b| b.into_inner().driver_id);
    let order = engine
        .assign_driver(principal, path.into_inner(), driver_id)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn delivery_progress(
    engine: Engine,
    principal: Principal,
    path: web::Path<(Uuid, String)>,
    body: Option<web::Json<ReasonBody>>,
) -> Result<HttpResponse, EngineError> {
    let (order_id, milestone) = path.into_inner();
    let progress = engine
        .record_delivery_progress(principal, order_id, &milestone, reason_of(body))
        .await?;
    Ok(HttpResponse::Ok().json(progress))
}

pub async fn request_refund(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: web::Json<RefundRequestBody>,
) -> Result<HttpResponse, EngineError> {
    let order = engine
        .request_refund(principal, path.into_inner(), body.into_inner().reason)
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn decide_refund(
    engine: Engine,
    principal: Principal,
    path: web::Path<Uuid>,
    body: web::Json<RefundDecision>,
) -> Result<HttpResponse, EngineError> {
    let order = engine
        .process_refund(principal, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(order))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::json;

    use crate::api::{configure, ID_HEADER, ROLE_HEADER};
    use crate::domain::principal::Principal;
    use crate::fulfillment::testkit::{world, World};

    macro_rules! app {
        ($w:expr) => {
            test::init_service(
                App::new()
                    .app_data(actix_web::web::Data::new($w.engine.clone()))
                    .configure(configure),
            )
            .await
        };
    }

    fn as_principal(req: test::TestRequest, principal: Principal) -> test::TestRequest {
        req.insert_header((ROLE_HEADER, principal.role.as_str()))
            .insert_header((ID_HEADER, principal.id.to_string()))
    }

    fn order_body(w: &World) -> serde_json::Value {
        json!({
            "meal_type": "dinner",
            "scheduled_date": w.today,
            "menu_item_id": w.dinner_item,
            "addon_ids": [w.addon],
        })
    }

    #[actix_web::test]
    async fn test_place_and_fetch_order() {
        let w = world().await;
        let app = app!(w);

        let req = as_principal(test::TestRequest::post().uri("/orders"), w.customer)
            .set_json(order_body(&w))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let order: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(order["status"], "PLACED");
        let total: rust_decimal::Decimal = order["total_amount"].as_str().unwrap().parse().unwrap();
        assert_eq!(total, rust_decimal::Decimal::from(220));

        let req = as_principal(test::TestRequest::get().uri(&format!("/orders/{}", order["id"].as_str().unwrap())), w.staff)
            .to_request();
        let fetched: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["id"], order["id"]);
    }

    #[actix_web::test]
    async fn test_missing_principal_is_401() {
        let w = world().await;
        let app = app!(w);

        let req = test::TestRequest::post().uri("/orders").set_json(order_body(&w)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "UNAUTHORIZED");
    }

    #[actix_web::test]
    async fn test_duplicate_order_is_409_and_skip_is_400() {
        let w = world().await;
        let app = app!(w);

        let place = || {
            as_principal(test::TestRequest::post().uri("/orders"), w.customer)
                .set_json(order_body(&w))
                .to_request()
        };
        let first: serde_json::Value = test::call_and_read_body_json(&app, place()).await;
        let dup = test::call_service(&app, place()).await;
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        let uri = format!("/orders/{}/status", first["id"].as_str().unwrap());
        let req = as_principal(test::TestRequest::post().uri(&uri), w.staff)
            .set_json(json!({ "status": "OUT_FOR_DELIVERY" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "BAD_REQUEST");
    }

    #[actix_web::test]
    async fn test_customer_cannot_change_status() {
        let w = world().await;
        let app = app!(w);

        let req = as_principal(test::TestRequest::post().uri("/orders"), w.customer)
            .set_json(order_body(&w))
            .to_request();
        let order: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let uri = format!("/orders/{}/status", order["id"].as_str().unwrap());
        let req = as_principal(test::TestRequest::post().uri(&uri), w.customer)
            .set_json(json!({ "status": "accepted" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_cancel_without_body_and_refund_flow() {
        let w = world().await;
        let app = app!(w);

        let req = as_principal(test::TestRequest::post().uri("/orders"), w.customer)
            .set_json(order_body(&w))
            .to_request();
        let order: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = order["id"].as_str().unwrap().to_string();

        let req = as_principal(test::TestRequest::post().uri(&format!("/orders/{id}/refund")), w.customer)
            .set_json(json!({ "reason": "changed plans" }))
            .to_request();
        let requested: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(requested["refund"]["status"], "PENDING");

        let req = as_principal(test::TestRequest::post().uri(&format!("/orders/{id}/refund/decision")), w.staff)
            .set_json(json!({ "decision": "APPROVE" }))
            .to_request();
        let decided: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(decided["refund"]["status"], "PROCESSED");
        assert_eq!(decided["status"], "CANCELLED");

        let req = as_principal(test::TestRequest::post().uri(&format!("/orders/{id}/cancel")), w.customer).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_error_envelope() {
        let w = world().await;
        let app = app!(w);

        let req = as_principal(test::TestRequest::post().uri("/orders"), w.customer)
            .set_json(json!({ "meal_type": "dinner" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "BAD_REQUEST");
    }
}
