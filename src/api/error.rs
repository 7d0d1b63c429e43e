use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};

use crate::fulfillment::{EngineError, ErrorKind};

// ============================================================================
// HTTP error mapping
// ============================================================================
//
// Body shape for every failure: {"kind": "NOT_FOUND", "message": "..."}.
// Store failures are logged here and reported without their cause.
//
// ============================================================================

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            EngineError::Store(e) => {
                tracing::error!(error = %e, "Store failure while serving request");
                "internal store failure".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "kind": self.kind().as_str(),
            "message": message,
        }))
    }
}

/// Malformed JSON bodies report through the same envelope as engine errors.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| EngineError::Validation(format!("invalid request body: {}", err)).into())
}

/// Same for path segments that are not UUIDs.
pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| EngineError::Validation(format!("invalid path: {}", err)).into())
}
