use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::errors::DriverError;

// ============================================================================
// Delivery Driver - availability registry entry
// ============================================================================

/// Busy always carries the order it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverAvailability {
    Available,
    Busy { order_id: Uuid },
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDriver {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub availability: DriverAvailability,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl DeliveryDriver {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
            availability: DriverAvailability::Available,
            last_delivery_at: None,
            version: 1,
        }
    }

    pub fn is_available(&self) -> bool {
        self.is_active && self.availability == DriverAvailability::Available
    }

    pub fn current_order(&self) -> Option<Uuid> {
        match self.availability {
            DriverAvailability::Busy { order_id } => Some(order_id),
            _ => None,
        }
    }

    /// AVAILABLE → BUSY bound to `order_id`.
    pub fn claim(&self, order_id: Uuid) -> Result<DeliveryDriver, DriverError> {
        if !self.is_active {
            return Err(DriverError::Inactive(self.id));
        }
        match self.availability {
            DriverAvailability::Available => {}
            DriverAvailability::Busy { order_id: current } => {
                return Err(DriverError::Busy { driver_id: self.id, order_id: current })
            }
            DriverAvailability::Offline => return Err(DriverError::Offline(self.id)),
        }

        let mut next = self.clone();
        next.availability = DriverAvailability::Busy { order_id };
        next.version += 1;
        Ok(next)
    }

    /// BUSY(order_id) → AVAILABLE. `None` if the driver is no longer bound to
    /// that order. `completed_at` stamps the round-robin key.
    pub fn release(&self, order_id: Uuid, completed_at: Option<DateTime<Utc>>) -> Option<DeliveryDriver> {
        if self.current_order() != Some(order_id) {
            return None;
        }

        let mut next = self.clone();
        next.availability = DriverAvailability::Available;
        if let Some(at) = completed_at {
            next.last_delivery_at = Some(at);
        }
        next.version += 1;
        Some(next)
    }

    /// Registry toggle. Going offline is refused while bound to an order.
    pub fn set_online(&self, online: bool) -> Result<DeliveryDriver, DriverError> {
        let target = if online {
            DriverAvailability::Available
        } else {
            DriverAvailability::Offline
        };

        match self.availability {
            DriverAvailability::Busy { order_id } => {
                Err(DriverError::Busy { driver_id: self.id, order_id })
            }
            current if current == target => Ok(self.clone()),
            _ => {
                let mut next = self.clone();
                next.availability = target;
                next.version += 1;
                Ok(next)
            }
        }
    }
}

/// Round-robin order: never-delivered first, then oldest last delivery,
/// ties broken by id.
pub fn rotation_order(a: &DeliveryDriver, b: &DeliveryDriver) -> Ordering {
    match (a.last_delivery_at, b.last_delivery_at) {
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (x, y) => x.cmp(&y),
    }
    .then_with(|| a.id.cmp(&b.id))
}
