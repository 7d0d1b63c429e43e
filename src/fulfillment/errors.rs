use crate::domain::delivery::DeliveryError;
use crate::domain::driver::DriverError;
use crate::domain::meal::UnknownVariant;
use crate::domain::order::{CommandError, OrderError};
use crate::domain::subscription::VoucherError;
use crate::domain::timing::TimingViolation;

// ============================================================================
// Engine Errors - the taxonomy every operation reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input, unknown enum value, cutoff or balance violations.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal transition for the record's current state.
    #[error("{0}")]
    StateConflict(String),

    /// Duplicate order, busy driver, or a write that kept losing races.
    #[error("{0}")]
    ResourceConflict(String),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::StateConflict(_) => ErrorKind::BadRequest,
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::ResourceConflict(_) => ErrorKind::Conflict,
            EngineError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<OrderError> for EngineError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NegativeTotal(_)
            | OrderError::VouchersWithoutSubscription
            | OrderError::EmptyRefundReason
            | OrderError::InvalidRefundAmount { .. }
            | OrderError::InvalidTarget(_) => EngineError::Validation(err.to_string()),
            OrderError::AlreadyExists => EngineError::ResourceConflict(err.to_string()),
            _ => EngineError::StateConflict(err.to_string()),
        }
    }
}

impl From<CommandError> for EngineError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound(id) => EngineError::not_found("order", id),
            CommandError::Rejected(e) => e.into(),
            CommandError::Conflict(c) => EngineError::ResourceConflict(format!(
                "order {} was modified concurrently, retry the request",
                c.aggregate_id
            )),
            CommandError::Store(e) => EngineError::Store(e),
        }
    }
}

impl From<VoucherError> for EngineError {
    fn from(err: VoucherError) -> Self {
        match err {
            VoucherError::NotFound(id) => EngineError::not_found("subscription", id),
            VoucherError::AlreadyRedeemed(_) | VoucherError::Contended(_) => {
                EngineError::ResourceConflict(err.to_string())
            }
            _ => EngineError::Validation(err.to_string()),
        }
    }
}

impl From<DriverError> for EngineError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound(id) | DriverError::Inactive(id) => EngineError::not_found("driver", id),
            DriverError::NoneAvailable => EngineError::not_found("driver", "no available driver"),
            DriverError::Busy { .. } | DriverError::Offline(_) => EngineError::StateConflict(err.to_string()),
        }
    }
}

impl From<DeliveryError> for EngineError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NotFound(order_id) => EngineError::not_found("delivery", order_id),
            DeliveryError::Closed(_) => EngineError::StateConflict(err.to_string()),
            DeliveryError::DriverAlreadyBound(_) => EngineError::ResourceConflict(err.to_string()),
        }
    }
}

impl From<TimingViolation> for EngineError {
    fn from(err: TimingViolation) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<UnknownVariant> for EngineError {
    fn from(err: UnknownVariant) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::domain::order::OrderStatus;

    #[test]
    fn test_guard_violations_are_bad_requests() {
        let err: EngineError = OrderError::AlreadyInStatus(OrderStatus::Accepted).into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err: EngineError = OrderError::OutForDelivery.into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_driver_errors_follow_dispatch_taxonomy() {
        let driver = Uuid::new_v4();
        let err: EngineError = DriverError::Busy { driver_id: driver, order_id: Uuid::new_v4() }.into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err: EngineError = DriverError::NoneAvailable.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: EngineError = DriverError::Inactive(driver).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_delivery_binding_is_a_conflict() {
        let err: EngineError = DeliveryError::DriverAlreadyBound(Uuid::new_v4()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_voucher_balance_errors_are_bad_requests() {
        let err: EngineError = VoucherError::InsufficientBalance { remaining: 0, requested: 1 }.into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err: EngineError = VoucherError::NotFound(Uuid::new_v4()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_store_failures_are_internal() {
        let err: EngineError = anyhow::anyhow!("connection reset").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.kind().as_str(), "INTERNAL");
    }
}
