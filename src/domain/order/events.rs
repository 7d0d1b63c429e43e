use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::meal::{MealType, PackagingType};
use crate::event_sourcing::core::DomainEvent;
use super::value_objects::{CancelOrigin, FailureOrigin, LineItem};

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Accepted(OrderAccepted),
    PreparationStarted(PreparationStarted),
    OutForDelivery(OrderOutForDelivery),
    Delivered(OrderDelivered),
    Cancelled(OrderCancelled),
    Failed(OrderFailed),
    DriverAssigned(DriverAssigned),
    RefundRequested(RefundRequested),
    RefundProcessed(RefundProcessed),
    RefundRejected(RefundRejected),
    SoftDeleted(OrderSoftDeleted),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::Accepted(_) => "OrderAccepted",
            OrderEvent::PreparationStarted(_) => "OrderPreparationStarted",
            OrderEvent::OutForDelivery(_) => "OrderOutForDelivery",
            OrderEvent::Delivered(_) => "OrderDelivered",
            OrderEvent::Cancelled(_) => "OrderCancelled",
            OrderEvent::Failed(_) => "OrderFailed",
            OrderEvent::DriverAssigned(_) => "OrderDriverAssigned",
            OrderEvent::RefundRequested(_) => "OrderRefundRequested",
            OrderEvent::RefundProcessed(_) => "OrderRefundProcessed",
            OrderEvent::RefundRejected(_) => "OrderRefundRejected",
            OrderEvent::SoftDeleted(_) => "OrderSoftDeleted",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Placed - Initial event, carries the priced snapshot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPlaced {
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
    pub placed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderAccepted {
    pub accepted_at: DateTime<Utc>,
    pub accepted_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PreparationStarted {
    pub preparing_at: DateTime<Utc>,
    pub started_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderOutForDelivery {
    pub out_for_delivery_at: DateTime<Utc>,
    pub dispatched_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDelivered {
    pub delivered_at: DateTime<Utc>,
    pub confirmed_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: Uuid,
    pub origin: CancelOrigin,
    pub reason: Option<String>,
}

/// Order Failed - kitchen rejection or failed delivery
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderFailed {
    pub failed_at: DateTime<Utc>,
    pub failed_by: Uuid,
    pub origin: FailureOrigin,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DriverAssigned {
    pub driver_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefundRequested {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub requested_by: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefundProcessed {
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
    pub processed_by: Uuid,
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefundRejected {
    pub processed_at: DateTime<Utc>,
    pub processed_by: Uuid,
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderSoftDeleted {
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: Uuid,
}
