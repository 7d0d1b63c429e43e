use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::meal::{MealType, PackagingType};
use crate::domain::principal::Principal;
use super::value_objects::{CancelOrigin, FailureOrigin, LineItem, OrderStatus};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// A command plus who issued it and when.
#[derive(Debug, Clone)]
pub struct OrderCommand {
    pub issued_by: Principal,
    pub issued_at: DateTime<Utc>,
    pub action: OrderAction,
}

impl OrderCommand {
    pub fn new(issued_by: Principal, issued_at: DateTime<Utc>, action: OrderAction) -> Self {
        Self {
            issued_by,
            issued_at,
            action,
        }
    }
}

#[derive(Debug, Clone)]
pub enum OrderAction {
    Place(PlaceOrder),
    /// Forward kitchen / delivery progress: Accepted .. Delivered.
    Advance {
        target: OrderStatus,
    },
    Fail {
        origin: FailureOrigin,
        reason: Option<String>,
    },
    Cancel {
        origin: CancelOrigin,
        reason: Option<String>,
    },
    AssignDriver {
        driver_id: Uuid,
    },
    RequestRefund {
        reason: String,
    },
    ApproveRefund {
        amount: Option<Decimal>,
        note: Option<String>,
    },
    RejectRefund {
        note: Option<String>,
    },
    SoftDelete,
}

/// Fully priced placement, produced by the placement validator.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub meal_type: MealType,
    pub scheduled_date: NaiveDate,
    pub packaging: PackagingType,
    pub menu_item: LineItem,
    pub addons: Vec<LineItem>,
    pub total_amount: Decimal,
    pub subscription_used: Option<Uuid>,
    pub vouchers_consumed: u32,
    pub notes: Option<String>,
}
