use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::meal::{MealType, UnknownVariant};
use super::errors::DeliveryError;

// ============================================================================
// Delivery - one per order, created on first acceptance
// ============================================================================
//
// Progress is a set of timestamps; the status is derived from them. Each
// milestone fills in any missing predecessor so out-for-delivery never
// exists without a pickup, and delivered / failed exclude each other.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMilestone {
    PickedUp,
    OutForDelivery,
    Delivered,
    Failed,
}

impl DeliveryMilestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMilestone::PickedUp => "PICKED_UP",
            DeliveryMilestone::OutForDelivery => "OUT_FOR_DELIVERY",
            DeliveryMilestone::Delivered => "DELIVERED",
            DeliveryMilestone::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeliveryMilestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMilestone {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace(['-', ' '], "_").to_ascii_uppercase();
        match normalized.as_str() {
            "PICKED_UP" | "PICKUP" => Ok(DeliveryMilestone::PickedUp),
            "OUT_FOR_DELIVERY" => Ok(DeliveryMilestone::OutForDelivery),
            "DELIVERED" => Ok(DeliveryMilestone::Delivered),
            "FAILED" => Ok(DeliveryMilestone::Failed),
            _ => Err(UnknownVariant {
                kind: "delivery milestone",
                value: s.to_string(),
            }),
        }
    }
}

/// Meal service time in the service timezone: lunch 12:30, dinner 20:00.
pub fn estimated_arrival(meal_type: MealType, date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let minutes_after_midnight = match meal_type {
        MealType::Lunch => 12 * 60 + 30,
        MealType::Dinner => 20 * 60,
    };

    let local = date.and_time(NaiveTime::MIN) + Duration::minutes(minutes_after_midnight);
    (local - Duration::seconds(offset.local_minus_utc().into())).and_utc()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub from: Location,
    pub to: Location,
    pub driver_id: Option<Uuid>,
    pub driver_assigned_at: Option<DateTime<Utc>>,
    pub estimated_delivery_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub out_for_delivery_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_to_deliver_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl Delivery {
    pub fn provision(
        order_id: Uuid,
        from: Location,
        to: Location,
        estimated_delivery_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            from,
            to,
            driver_id: None,
            driver_assigned_at: None,
            estimated_delivery_at,
            picked_up_at: None,
            out_for_delivery_at: None,
            delivered_at: None,
            failed_to_deliver_at: None,
            failure_reason: None,
            is_deleted: false,
            created_at,
            version: 1,
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        if self.failed_to_deliver_at.is_some() {
            DeliveryStatus::Failed
        } else if self.delivered_at.is_some() {
            DeliveryStatus::Delivered
        } else if self.picked_up_at.is_some() {
            DeliveryStatus::InProgress
        } else {
            DeliveryStatus::Pending
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status(), DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// Bind the assigned driver. Returns `None` if already bound to it.
    pub fn assign_driver(&self, driver_id: Uuid, at: DateTime<Utc>) -> Result<Option<Delivery>, DeliveryError> {
        match self.driver_id {
            Some(current) if current == driver_id => return Ok(None),
            Some(current) => return Err(DeliveryError::DriverAlreadyBound(current)),
            None => {}
        }
        if self.is_closed() {
            return Err(DeliveryError::Closed(self.status()));
        }

        let mut next = self.clone();
        next.driver_id = Some(driver_id);
        next.driver_assigned_at = Some(at);
        next.version += 1;
        Ok(Some(next))
    }

    /// Record a milestone. Returns `None` when it was already recorded.
    pub fn record(
        &self,
        milestone: DeliveryMilestone,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Option<Delivery>, DeliveryError> {
        let already = match milestone {
            DeliveryMilestone::PickedUp => self.picked_up_at.is_some(),
            DeliveryMilestone::OutForDelivery => self.out_for_delivery_at.is_some(),
            DeliveryMilestone::Delivered => self.delivered_at.is_some(),
            DeliveryMilestone::Failed => self.failed_to_deliver_at.is_some(),
        };
        if already {
            return Ok(None);
        }
        if self.is_closed() {
            return Err(DeliveryError::Closed(self.status()));
        }

        let mut next = self.clone();
        match milestone {
            DeliveryMilestone::PickedUp => {
                next.picked_up_at = Some(at);
            }
            DeliveryMilestone::OutForDelivery => {
                next.picked_up_at.get_or_insert(at);
                next.out_for_delivery_at = Some(at);
            }
            DeliveryMilestone::Delivered => {
                next.picked_up_at.get_or_insert(at);
                next.out_for_delivery_at.get_or_insert(at);
                next.delivered_at = Some(at);
            }
            DeliveryMilestone::Failed => {
                next.failed_to_deliver_at = Some(at);
                next.failure_reason = reason;
            }
        }
        next.version += 1;

        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(address: &str) -> Location {
        Location {
            address: address.to_string(),
            coordinates: None,
        }
    }

    fn delivery() -> Delivery {
        Delivery::provision(Uuid::new_v4(), location("Kitchen"), location("Home"), Utc::now(), Utc::now())
    }

    #[test]
    fn test_eta_uses_service_offset() {
        let date = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();

        let lunch = estimated_arrival(MealType::Lunch, date, ist);
        assert_eq!(lunch.with_timezone(&ist).format("%H:%M").to_string(), "12:30");
        assert_eq!(lunch.format("%H:%M").to_string(), "07:00");

        let dinner = estimated_arrival(MealType::Dinner, date, FixedOffset::east_opt(0).unwrap());
        assert_eq!(dinner.format("%Y-%m-%d %H:%M").to_string(), "2026-05-04 20:00");
    }

    #[test]
    fn test_milestones_fill_predecessors() {
        let d = delivery();
        assert_eq!(d.status(), DeliveryStatus::Pending);

        let at = Utc::now();
        let delivered = d.record(DeliveryMilestone::Delivered, at, None).unwrap().unwrap();
        assert_eq!(delivered.picked_up_at, Some(at));
        assert_eq!(delivered.out_for_delivery_at, Some(at));
        assert_eq!(delivered.status(), DeliveryStatus::Delivered);
    }

    #[test]
    fn test_milestones_are_idempotent() {
        let d = delivery();
        let picked = d.record(DeliveryMilestone::PickedUp, Utc::now(), None).unwrap().unwrap();
        assert_eq!(picked.status(), DeliveryStatus::InProgress);
        assert!(picked.record(DeliveryMilestone::PickedUp, Utc::now(), None).unwrap().is_none());
    }

    #[test]
    fn test_delivered_and_failed_exclude_each_other() {
        let d = delivery();
        let failed = d
            .record(DeliveryMilestone::Failed, Utc::now(), Some("no answer".into()))
            .unwrap()
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("no answer"));

        let err = failed.record(DeliveryMilestone::Delivered, Utc::now(), None).unwrap_err();
        assert_eq!(err, DeliveryError::Closed(DeliveryStatus::Failed));

        let delivered = d.record(DeliveryMilestone::Delivered, Utc::now(), None).unwrap().unwrap();
        let err = delivered.record(DeliveryMilestone::Failed, Utc::now(), None).unwrap_err();
        assert_eq!(err, DeliveryError::Closed(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_driver_binding() {
        let d = delivery();
        let driver = Uuid::new_v4();
        let bound = d.assign_driver(driver, Utc::now()).unwrap().unwrap();
        assert!(bound.assign_driver(driver, Utc::now()).unwrap().is_none());
        assert_eq!(
            bound.assign_driver(Uuid::new_v4(), Utc::now()).unwrap_err(),
            DeliveryError::DriverAlreadyBound(driver)
        );
    }

    #[test]
    fn test_milestone_parsing() {
        assert_eq!("picked-up".parse::<DeliveryMilestone>().unwrap(), DeliveryMilestone::PickedUp);
        assert_eq!("out_for_delivery".parse::<DeliveryMilestone>().unwrap(), DeliveryMilestone::OutForDelivery);
        assert!("teleported".parse::<DeliveryMilestone>().is_err());
    }
}
