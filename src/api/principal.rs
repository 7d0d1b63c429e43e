use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::{FutureExt, LocalBoxFuture};
use uuid::Uuid;

use crate::domain::principal::{Principal, Role};
use crate::fulfillment::{EngineError, FulfillmentEngine};

// ============================================================================
// Principal extractor
// ============================================================================
//
// The auth gateway in front of this service resolves the caller and forwards
// it as headers: a role plus either our id or, for customers, the identity
// issued by the auth provider. Requests without them never reach a handler.
//
// ============================================================================

pub const ROLE_HEADER: &str = "X-Principal-Role";
pub const ID_HEADER: &str = "X-Principal-Id";
pub const UID_HEADER: &str = "X-Principal-Uid";

/// What the headers claim before any directory lookup.
#[derive(Debug, PartialEq)]
enum Claim {
    Known(Principal),
    ExternalCustomer(String),
}

fn optional_header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Result<&'a str, EngineError> {
    optional_header(req, name).ok_or_else(|| EngineError::Unauthorized(format!("missing {} header", name)))
}

fn claim_from_headers(req: &HttpRequest) -> Result<Claim, EngineError> {
    let role: Role = header(req, ROLE_HEADER)?
        .parse()
        .map_err(|e| EngineError::Unauthorized(format!("{}", e)))?;

    if role == Role::Customer && optional_header(req, ID_HEADER).is_none() {
        if let Some(uid) = optional_header(req, UID_HEADER) {
            return Ok(Claim::ExternalCustomer(uid.to_string()));
        }
    }

    let id: Uuid = header(req, ID_HEADER)?
        .parse()
        .map_err(|_| EngineError::Unauthorized(format!("{} is not a UUID", ID_HEADER)))?;

    Ok(Claim::Known(Principal { id, role }))
}

impl FromRequest for Principal {
    type Error = EngineError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let claim = claim_from_headers(req);
        let engine = req.app_data::<web::Data<FulfillmentEngine>>().cloned();
        let path = req.path().to_string();

        async move {
            let result = match claim {
                Ok(Claim::Known(principal)) => Ok(principal),
                Ok(Claim::ExternalCustomer(uid)) => match engine {
                    Some(engine) => engine.resolve_customer(&uid).await,
                    None => Err(EngineError::Unauthorized("customer directory unavailable".into())),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::warn!(path = %path, error = %e, "Rejected request without a valid principal");
            }
            result
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    use crate::fulfillment::testkit::world;

    #[test]
    fn test_headers_resolve_principal() {
        let id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header((ROLE_HEADER, "kitchen"))
            .insert_header((ID_HEADER, id.to_string()))
            .to_http_request();

        assert_eq!(claim_from_headers(&req).unwrap(), Claim::Known(Principal::staff(id)));
    }

    #[test]
    fn test_missing_or_bad_headers_are_unauthorized() {
        let no_headers = TestRequest::default().to_http_request();
        assert!(matches!(claim_from_headers(&no_headers), Err(EngineError::Unauthorized(_))));

        let bad_role = TestRequest::default()
            .insert_header((ROLE_HEADER, "chef"))
            .insert_header((ID_HEADER, Uuid::new_v4().to_string()))
            .to_http_request();
        assert!(matches!(claim_from_headers(&bad_role), Err(EngineError::Unauthorized(_))));

        let bad_id = TestRequest::default()
            .insert_header((ROLE_HEADER, "ADMIN"))
            .insert_header((ID_HEADER, "42"))
            .to_http_request();
        assert!(matches!(claim_from_headers(&bad_id), Err(EngineError::Unauthorized(_))));

        // Only customers may be named by external identity.
        let staff_uid = TestRequest::default()
            .insert_header((ROLE_HEADER, "staff"))
            .insert_header((UID_HEADER, "cust-1"))
            .to_http_request();
        assert!(matches!(claim_from_headers(&staff_uid), Err(EngineError::Unauthorized(_))));
    }

    #[actix_web::test]
    async fn test_customer_resolved_by_external_identity() {
        let w = world().await;
        let data = web::Data::new(w.engine.clone());

        let req = TestRequest::default()
            .insert_header((ROLE_HEADER, "customer"))
            .insert_header((UID_HEADER, "cust-1"))
            .app_data(data.clone())
            .to_http_request();
        assert_eq!(Principal::extract(&req).await.unwrap(), w.customer);

        let unknown = TestRequest::default()
            .insert_header((ROLE_HEADER, "customer"))
            .insert_header((UID_HEADER, "nobody"))
            .app_data(data)
            .to_http_request();
        assert!(matches!(Principal::extract(&unknown).await, Err(EngineError::Unauthorized(_))));
    }
}
