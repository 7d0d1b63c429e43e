use rust_decimal::Decimal;

use super::value_objects::{OrderStatus, RefundStatus};

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order is already {0}")]
    AlreadyInStatus(OrderStatus),

    #[error("Order is {0} and admits no further transitions")]
    TerminalState(OrderStatus),

    #[error("Order must be {required} before it can become {target} (currently {current})")]
    MissingPredecessor {
        target: OrderStatus,
        required: OrderStatus,
        current: OrderStatus,
    },

    #[error("{0} is not a target reachable through this operation")]
    InvalidTarget(OrderStatus),

    #[error("Order is out for delivery and can no longer be cancelled by the customer")]
    OutForDelivery,

    #[error("Order already has driver {0} assigned")]
    DriverAlreadyAssigned(uuid::Uuid),

    #[error("Refund already {0:?}")]
    RefundAlreadyRequested(RefundStatus),

    #[error("Refund is {0:?}, not pending")]
    RefundNotPending(RefundStatus),

    #[error("Delivered orders cannot be refunded")]
    DeliveredNotRefundable,

    #[error("Refund amount {amount} must be between 0 and the order total {total}")]
    InvalidRefundAmount { amount: Decimal, total: Decimal },

    #[error("Refund reason cannot be empty")]
    EmptyRefundReason,

    #[error("Only delivered, cancelled or failed orders can be deleted (currently {0})")]
    NotTerminal(OrderStatus),

    #[error("Order is deleted")]
    Deleted,

    #[error("Order total cannot be negative: {0}")]
    NegativeTotal(Decimal),

    #[error("Vouchers consumed without a subscription reference")]
    VouchersWithoutSubscription,

    #[error("Order already exists")]
    AlreadyExists,

    #[error("Aggregate not initialized")]
    NotInitialized,
}
