use serde::Serialize;
use uuid::Uuid;

use crate::domain::delivery::{Delivery, DeliveryMilestone};
use crate::domain::driver::DeliveryDriver;
use crate::domain::order::{FailureOrigin, OrderAction, OrderAggregate, OrderError, OrderStatus};
use crate::domain::principal::{Principal, Role};
use super::errors::EngineError;
use super::{forbidden, FulfillmentEngine};

// ============================================================================
// Dispatch - driver assignment and delivery progress
// ============================================================================
//
// Assignment is a two-record saga: claim the driver (conditional write),
// then record it on the order. If the order write fails the claim is
// released again without touching the driver's rotation stamp.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryProgress {
    pub order: OrderAggregate,
    pub delivery: Option<Delivery>,
}

impl FulfillmentEngine {
    /// Bind `driver_id`, or the next driver in rotation when `None`.
    pub async fn assign_driver(
        &self,
        principal: Principal,
        order_id: Uuid,
        driver_id: Option<Uuid>,
    ) -> Result<OrderAggregate, EngineError> {
        if !principal.is_operator() {
            return Err(forbidden(principal, "assign drivers"));
        }

        let order = self.load_order(order_id).await?;
        if order.is_deleted {
            return Err(EngineError::not_found("order", order_id));
        }
        if order.is_terminal() {
            return Err(OrderError::TerminalState(order.status).into());
        }
        if let Some(existing) = order.driver_id {
            return Err(OrderError::DriverAlreadyAssigned(existing).into());
        }

        let (mode, claimed) = match driver_id {
            Some(id) => ("manual", self.drivers.claim(id, order_id).await),
            None => ("auto", self.drivers.claim_next_available(order_id).await),
        };
        let driver = match claimed {
            Ok(driver) => driver,
            Err(err) => {
                self.reject("assign_driver", order_id, &err);
                return Err(err);
            }
        };

        let result = self
            .run(order_id, principal, OrderAction::AssignDriver { driver_id: driver.id }, "assign_driver")
            .await;

        match result {
            Ok(order) => {
                self.metrics.record_driver_assignment(mode);
                tracing::info!(order_id = %order_id, driver_id = %driver.id, mode = mode, "🛵 Driver assigned");
                Ok(order)
            }
            Err(err) => {
                tracing::warn!(order_id = %order_id, driver_id = %driver.id, error = %err, "Releasing claimed driver");
                if let Err(release_err) = self.drivers.release(driver.id, order_id, None).await {
                    tracing::error!(
                        order_id = %order_id,
                        driver_id = %driver.id,
                        error = %release_err,
                        "❌ Driver left bound to an order that never recorded it"
                    );
                }
                Err(err)
            }
        }
    }

    /// Driver-side progress. Pickup only touches the delivery record; the
    /// other milestones move the order and let its effects update the
    /// delivery.
    pub async fn record_delivery_progress(
        &self,
        principal: Principal,
        order_id: Uuid,
        milestone: &str,
        reason: Option<String>,
    ) -> Result<DeliveryProgress, EngineError> {
        let milestone: DeliveryMilestone = milestone.parse()?;

        let order = self.load_order(order_id).await?;
        if order.is_deleted {
            return Err(EngineError::not_found("order", order_id));
        }

        let bound_driver = principal.role == Role::Driver && order.driver_id == Some(principal.id);
        if !principal.is_operator() && !bound_driver {
            return Err(forbidden(principal, "report delivery progress for this order"));
        }

        let order = match milestone {
            DeliveryMilestone::PickedUp => {
                if order.is_terminal() {
                    return Err(OrderError::TerminalState(order.status).into());
                }
                self.provisioner
                    .record(order_id, milestone, self.clock.now_utc(), None)
                    .await?;
                order
            }
            DeliveryMilestone::OutForDelivery => {
                let action = OrderAction::Advance { target: OrderStatus::OutForDelivery };
                self.run(order_id, principal, action, "delivery_progress").await?
            }
            DeliveryMilestone::Delivered => {
                let action = OrderAction::Advance { target: OrderStatus::Delivered };
                self.run(order_id, principal, action, "delivery_progress").await?
            }
            DeliveryMilestone::Failed => {
                let action = OrderAction::Fail {
                    origin: FailureOrigin::DeliveryFailure,
                    reason,
                };
                self.run(order_id, principal, action, "delivery_progress").await?
            }
        };

        let delivery = self.provisioner.for_order(order_id).await?;
        Ok(DeliveryProgress { order, delivery })
    }

    /// Toggle a driver between AVAILABLE and OFFLINE. Drivers manage
    /// themselves; operators manage anyone.
    pub async fn set_driver_availability(
        &self,
        principal: Principal,
        driver_id: Uuid,
        online: bool,
    ) -> Result<DeliveryDriver, EngineError> {
        let is_self = principal.role == Role::Driver && principal.id == driver_id;
        if !principal.is_operator() && !is_self {
            return Err(forbidden(principal, "change driver availability"));
        }

        self.drivers.set_online(driver_id, online).await
    }
}
