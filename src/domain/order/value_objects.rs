use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::meal::{MealType, UnknownVariant};

// ============================================================================
// Order Value Objects
// ============================================================================

/// Catalog entry captured at order time. The price is never re-read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LineItem {
    pub item_id: Uuid,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Placed,
    Accepted,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
    Failed,
}

/// Forward edges of the happy path. Cancelled / Failed are handled separately
/// because they are reachable from every non-terminal state.
const FORWARD_TRANSITIONS: [(OrderStatus, OrderStatus); 4] = [
    (OrderStatus::Placed, OrderStatus::Accepted),
    (OrderStatus::Accepted, OrderStatus::Preparing),
    (OrderStatus::Preparing, OrderStatus::OutForDelivery),
    (OrderStatus::OutForDelivery, OrderStatus::Delivered),
];

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "PLACED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// The state that must be current before `self` can be entered on the
    /// forward path.
    pub fn predecessor(&self) -> Option<OrderStatus> {
        FORWARD_TRANSITIONS
            .iter()
            .find(|(_, to)| to == self)
            .map(|(from, _)| *from)
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match target {
            OrderStatus::Cancelled | OrderStatus::Failed => !self.is_terminal(),
            _ => FORWARD_TRANSITIONS.contains(&(*self, target)),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_uppercase() })
            .collect();

        match normalized.as_str() {
            "PLACED" => Ok(OrderStatus::Placed),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "PREPARING" => Ok(OrderStatus::Preparing),
            "OUT_FOR_DELIVERY" | "OUTFORDELIVERY" => Ok(OrderStatus::OutForDelivery),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            "FAILED" | "REJECTED" => Ok(OrderStatus::Failed),
            _ => Err(UnknownVariant {
                kind: "order status",
                value: s.to_string(),
            }),
        }
    }
}

/// Timestamps written exclusively by applying admitted transitions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Lifecycle {
    pub placed_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub preparing_at: Option<DateTime<Utc>>,
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn new(placed_at: DateTime<Utc>) -> Self {
        Self {
            placed_at,
            accepted_at: None,
            preparing_at: None,
            out_for_delivery_at: None,
            delivered_at: None,
            cancelled_at: None,
            failed_at: None,
        }
    }

    pub fn timestamp_of(&self, status: OrderStatus) -> Option<DateTime<Utc>> {
        match status {
            OrderStatus::Placed => Some(self.placed_at),
            OrderStatus::Accepted => self.accepted_at,
            OrderStatus::Preparing => self.preparing_at,
            OrderStatus::OutForDelivery => self.out_for_delivery_at,
            OrderStatus::Delivered => self.delivered_at,
            OrderStatus::Cancelled => self.cancelled_at,
            OrderStatus::Failed => self.failed_at,
        }
    }

    /// Most recent timestamp recorded so far.
    pub fn latest(&self) -> DateTime<Utc> {
        [
            self.accepted_at,
            self.preparing_at,
            self.out_for_delivery_at,
            self.delivered_at,
            self.cancelled_at,
            self.failed_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.placed_at, |acc, ts| acc.max(ts))
    }

    pub(crate) fn stamp(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::Placed => return,
            OrderStatus::Accepted => &mut self.accepted_at,
            OrderStatus::Preparing => &mut self.preparing_at,
            OrderStatus::OutForDelivery => &mut self.out_for_delivery_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
            OrderStatus::Failed => &mut self.failed_at,
        };
        *slot = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[default]
    None,
    Pending,
    Processed,
    Rejected,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct RefundRecord {
    pub status: RefundStatus,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<Uuid>,
    pub review_note: Option<String>,
}

/// Who ended the order through the cancellation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelOrigin {
    Customer,
    Admin,
    RefundApproval,
}

/// Why an order ended in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureOrigin {
    KitchenRejection,
    DeliveryFailure,
}

/// Details recorded when an order enters Cancelled or Failed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Closure {
    pub by: Uuid,
    pub reason: Option<String>,
    pub cancel_origin: Option<CancelOrigin>,
    pub failure_origin: Option<FailureOrigin>,
}

/// Key of the duplicate-order guard: one live order per customer, meal,
/// date and menu item.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderSlot {
    pub customer_id: Uuid,
    pub meal_type: MealType,
    pub scheduled_date: NaiveDate,
    pub menu_item_id: Uuid,
}

impl OrderSlot {
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.customer_id, self.meal_type, self.scheduled_date, self.menu_item_id
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_predecessors() {
        assert_eq!(OrderStatus::Placed.predecessor(), None);
        assert_eq!(OrderStatus::Accepted.predecessor(), Some(OrderStatus::Placed));
        assert_eq!(OrderStatus::Preparing.predecessor(), Some(OrderStatus::Accepted));
        assert_eq!(OrderStatus::OutForDelivery.predecessor(), Some(OrderStatus::Preparing));
        assert_eq!(OrderStatus::Delivered.predecessor(), Some(OrderStatus::OutForDelivery));
        assert_eq!(OrderStatus::Cancelled.predecessor(), None);
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled, OrderStatus::Failed] {
            assert!(terminal.is_terminal());
            for target in [
                OrderStatus::Accepted,
                OrderStatus::Preparing,
                OrderStatus::OutForDelivery,
                OrderStatus::Delivered,
                OrderStatus::Cancelled,
                OrderStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_no_skipping_forward() {
        assert!(!OrderStatus::Placed.can_transition_to(OrderStatus::Preparing));
        assert!(!OrderStatus::Accepted.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Preparing.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_status_parsing_aliases() {
        assert_eq!("out-for-delivery".parse::<OrderStatus>().unwrap(), OrderStatus::OutForDelivery);
        assert_eq!("rejected".parse::<OrderStatus>().unwrap(), OrderStatus::Failed);
        assert_eq!("Canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert!("cooking".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_lifecycle_latest_tracks_newest_stamp() {
        let placed = Utc::now();
        let mut lifecycle = Lifecycle::new(placed);
        assert_eq!(lifecycle.latest(), placed);

        let later = placed + chrono::Duration::minutes(5);
        lifecycle.stamp(OrderStatus::Accepted, later);
        assert_eq!(lifecycle.latest(), later);
        assert_eq!(lifecycle.timestamp_of(OrderStatus::Accepted), Some(later));
    }
}
