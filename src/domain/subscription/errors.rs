use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::meal::MealType;
use super::model::{PlanType, SubscriptionStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VoucherError {
    #[error("Voucher count must be at least 1")]
    InvalidCount,

    #[error("Only {remaining} voucher(s) left, {requested} requested")]
    InsufficientBalance { remaining: u32, requested: u32 },

    #[error("Subscription is {0}")]
    NotActive(SubscriptionStatus),

    #[error("Subscription expired on {0}")]
    Expired(NaiveDate),

    #[error("Vouchers were already drawn for order {0}")]
    AlreadyRedeemed(Uuid),

    #[error("{plan:?} plan does not cover {meal_type}")]
    PlanMismatch { plan: PlanType, meal_type: MealType },

    #[error("Subscription {0} is deleted")]
    Deleted(Uuid),

    #[error("Subscription not found: {0}")]
    NotFound(Uuid),

    #[error("Subscription {0} kept changing underneath the update")]
    Contended(Uuid),
}
