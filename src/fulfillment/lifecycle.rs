use serde::Deserialize;
use uuid::Uuid;

use crate::domain::order::{CancelOrigin, FailureOrigin, OrderAction, OrderAggregate, OrderStatus};
use crate::domain::principal::Principal;
use super::errors::EngineError;
use super::{forbidden, FulfillmentEngine};

// ============================================================================
// Order Lifecycle - kitchen transitions, cancellation, soft delete
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AdminCancel {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "bypass_by_default")]
    pub bypass_time_policy: bool,
}

fn bypass_by_default() -> bool {
    true
}

impl Default for AdminCancel {
    fn default() -> Self {
        Self {
            reason: None,
            bypass_time_policy: true,
        }
    }
}

impl AdminCancel {
    pub fn because(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

impl FulfillmentEngine {
    /// Kitchen / dispatch status change. `target` accepts the canonical
    /// status names; REJECTED is an alias for a kitchen failure.
    pub async fn transition_status(
        &self,
        principal: Principal,
        order_id: Uuid,
        target: &str,
        reason: Option<String>,
    ) -> Result<OrderAggregate, EngineError> {
        if !principal.is_operator() {
            return Err(forbidden(principal, "change order status"));
        }

        let target: OrderStatus = target.parse()?;

        let action = match target {
            OrderStatus::Placed => {
                return Err(EngineError::Validation("PLACED is only entered at creation".into()));
            }
            OrderStatus::Accepted
            | OrderStatus::Preparing
            | OrderStatus::OutForDelivery
            | OrderStatus::Delivered => OrderAction::Advance { target },
            OrderStatus::Failed => OrderAction::Fail {
                origin: FailureOrigin::KitchenRejection,
                reason,
            },
            OrderStatus::Cancelled => {
                if !principal.is_admin() {
                    return Err(forbidden(principal, "cancel orders through a status change"));
                }
                OrderAction::Cancel {
                    origin: CancelOrigin::Admin,
                    reason,
                }
            }
        };

        self.run(order_id, principal, action, "transition_status").await
    }

    /// Customer cancellation, gated by the meal cutoff for today's orders.
    pub async fn cancel_order(
        &self,
        principal: Principal,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderAggregate, EngineError> {
        let order = self.load_order(order_id).await?;
        if order.is_deleted {
            return Err(EngineError::not_found("order", order_id));
        }
        if !principal.is_customer(order.customer_id) {
            return Err(forbidden(principal, "cancel this order"));
        }

        if let Err(violation) = self
            .timing
            .can_cancel(order.meal_type, order.scheduled_date, self.clock.now_local())
        {
            let err = EngineError::from(violation);
            self.reject("cancel_order", order_id, &err);
            return Err(err);
        }

        self.run(
            order_id,
            principal,
            OrderAction::Cancel {
                origin: CancelOrigin::Customer,
                reason,
            },
            "cancel_order",
        )
        .await
    }

    /// Admin cancellation. Skips the cutoff unless `bypass_time_policy` is
    /// off, and is allowed while out for delivery.
    pub async fn admin_cancel(
        &self,
        principal: Principal,
        order_id: Uuid,
        request: AdminCancel,
    ) -> Result<OrderAggregate, EngineError> {
        if !principal.is_admin() {
            return Err(forbidden(principal, "cancel orders as admin"));
        }

        if !request.bypass_time_policy {
            let order = self.load_order(order_id).await?;
            if let Err(violation) = self
                .timing
                .can_cancel(order.meal_type, order.scheduled_date, self.clock.now_local())
            {
                let err = EngineError::from(violation);
                self.reject("admin_cancel", order_id, &err);
                return Err(err);
            }
        }

        let reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        self.run(
            order_id,
            principal,
            OrderAction::Cancel {
                origin: CancelOrigin::Admin,
                reason,
            },
            "admin_cancel",
        )
        .await
    }

    pub async fn soft_delete(&self, principal: Principal, order_id: Uuid) -> Result<OrderAggregate, EngineError> {
        if !principal.is_admin() {
            return Err(forbidden(principal, "delete orders"));
        }

        self.run(order_id, principal, OrderAction::SoftDelete, "soft_delete").await
    }
}
