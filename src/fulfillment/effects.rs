use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::delivery::DeliveryMilestone;
use crate::domain::order::{
    CommandError, FailureOrigin, OrderAggregate, OrderCommandHandler, OrderSlot, OrderStatus,
};
use crate::event_sourcing::core::OutboxMessage;
use crate::event_sourcing::store::OutboxStore;
use crate::metrics::Metrics;
use crate::store::SlotStore;
use super::drivers::DriverRegistry;
use super::provisioning::DeliveryProvisioner;
use super::vouchers::VoucherLedger;

// ============================================================================
// Pending Effects - post-commit work carried by the outbox
// ============================================================================
//
// An order transition decides its side effects up front (plan_effects) and
// records them in the same append as its events. They are then executed
// inline, best-effort; whatever fails stays pending for the outbox relay.
// Every effect is idempotent so a retry after a partial run is harmless.
//
// ============================================================================

/// Outbox `kind` for every effect message.
pub const EFFECT_KIND: &str = "PendingEffect";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingEffect {
    ProvisionDelivery {
        order_id: Uuid,
    },
    ReverseVouchers {
        order_id: Uuid,
        subscription_id: Uuid,
        count: u32,
    },
    ReleaseDriver {
        order_id: Uuid,
        driver_id: Uuid,
        /// Stamps the driver's rotation key when present.
        completed_at: Option<DateTime<Utc>>,
    },
    ReleaseSlot {
        order_id: Uuid,
        slot: OrderSlot,
    },
    MarkDeliveryMilestone {
        order_id: Uuid,
        milestone: DeliveryMilestone,
        at: DateTime<Utc>,
        reason: Option<String>,
    },
    AssignDeliveryDriver {
        order_id: Uuid,
        driver_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl PendingEffect {
    pub fn name(&self) -> &'static str {
        match self {
            PendingEffect::ProvisionDelivery { .. } => "provision_delivery",
            PendingEffect::ReverseVouchers { .. } => "reverse_vouchers",
            PendingEffect::ReleaseDriver { .. } => "release_driver",
            PendingEffect::ReleaseSlot { .. } => "release_slot",
            PendingEffect::MarkDeliveryMilestone { .. } => "mark_delivery_milestone",
            PendingEffect::AssignDeliveryDriver { .. } => "assign_delivery_driver",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            PendingEffect::ProvisionDelivery { order_id }
            | PendingEffect::ReverseVouchers { order_id, .. }
            | PendingEffect::ReleaseDriver { order_id, .. }
            | PendingEffect::ReleaseSlot { order_id, .. }
            | PendingEffect::MarkDeliveryMilestone { order_id, .. }
            | PendingEffect::AssignDeliveryDriver { order_id, .. } => *order_id,
        }
    }

    pub fn to_message(&self, correlation_id: Uuid) -> anyhow::Result<OutboxMessage> {
        OutboxMessage::new(self.order_id(), EFFECT_KIND, self, correlation_id)
    }

    pub fn from_message(message: &OutboxMessage) -> anyhow::Result<Self> {
        anyhow::ensure!(
            message.kind == EFFECT_KIND,
            "unexpected outbox message kind {:?}",
            message.kind
        );
        message.decode()
    }
}

/// Side effects owed by the transition `before` → `after`.
pub fn plan_effects(before: &OrderAggregate, after: &OrderAggregate) -> Vec<PendingEffect> {
    let order_id = after.id;
    let accepted = after.lifecycle.accepted_at.is_some();
    let mut effects = Vec::new();

    if before.lifecycle.accepted_at.is_none() && accepted {
        effects.push(PendingEffect::ProvisionDelivery { order_id });
    }

    if let (None, Some(driver_id), Some(at)) = (before.driver_id, after.driver_id, after.driver_assigned_at) {
        if accepted {
            effects.push(PendingEffect::AssignDeliveryDriver { order_id, driver_id, at });
        }
    }

    if before.status == after.status {
        return effects;
    }

    match after.status {
        OrderStatus::OutForDelivery => {
            if let Some(at) = after.lifecycle.out_for_delivery_at {
                effects.push(PendingEffect::MarkDeliveryMilestone {
                    order_id,
                    milestone: DeliveryMilestone::OutForDelivery,
                    at,
                    reason: None,
                });
            }
        }
        OrderStatus::Delivered => {
            if let Some(at) = after.lifecycle.delivered_at {
                effects.push(PendingEffect::MarkDeliveryMilestone {
                    order_id,
                    milestone: DeliveryMilestone::Delivered,
                    at,
                    reason: None,
                });
                if let Some(driver_id) = after.driver_id {
                    effects.push(PendingEffect::ReleaseDriver {
                        order_id,
                        driver_id,
                        completed_at: Some(at),
                    });
                }
            }
        }
        OrderStatus::Cancelled | OrderStatus::Failed => {
            let at = after.lifecycle.latest();
            let closure = after.closure.as_ref();

            if let Some(subscription_id) = after.subscription_used.filter(|_| after.vouchers_consumed > 0) {
                effects.push(PendingEffect::ReverseVouchers {
                    order_id,
                    subscription_id,
                    count: after.vouchers_consumed,
                });
            }

            if accepted {
                let reason = closure
                    .and_then(|c| c.reason.clone())
                    .or_else(|| Some(format!("order {}", after.status.as_str().to_lowercase())));
                effects.push(PendingEffect::MarkDeliveryMilestone {
                    order_id,
                    milestone: DeliveryMilestone::Failed,
                    at,
                    reason,
                });
            }

            if let Some(driver_id) = after.driver_id {
                // Only a completed delivery attempt moves the driver down the rotation.
                let attempted = closure.and_then(|c| c.failure_origin) == Some(FailureOrigin::DeliveryFailure);
                effects.push(PendingEffect::ReleaseDriver {
                    order_id,
                    driver_id,
                    completed_at: attempted.then_some(at),
                });
            }
        }
        _ => {}
    }

    if after.is_terminal() && !before.is_terminal() {
        effects.push(PendingEffect::ReleaseSlot {
            order_id,
            slot: after.slot(),
        });
    }

    effects
}

/// Outbox messages for the effects of `before` → `after`.
pub fn plan_messages(
    before: &OrderAggregate,
    after: &OrderAggregate,
    correlation_id: Uuid,
) -> anyhow::Result<Vec<OutboxMessage>> {
    plan_effects(before, after)
        .iter()
        .map(|effect| effect.to_message(correlation_id))
        .collect()
}

// ============================================================================
// Effect Executor
// ============================================================================

pub struct EffectExecutor {
    orders: Arc<OrderCommandHandler>,
    vouchers: VoucherLedger,
    drivers: DriverRegistry,
    provisioner: DeliveryProvisioner,
    slots: Arc<dyn SlotStore>,
    outbox: Arc<dyn OutboxStore>,
    metrics: Arc<Metrics>,
}

impl EffectExecutor {
    pub fn new(
        orders: Arc<OrderCommandHandler>,
        vouchers: VoucherLedger,
        drivers: DriverRegistry,
        provisioner: DeliveryProvisioner,
        slots: Arc<dyn SlotStore>,
        outbox: Arc<dyn OutboxStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            vouchers,
            drivers,
            provisioner,
            slots,
            outbox,
            metrics,
        }
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        &self.outbox
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Apply one effect. Safe to repeat.
    pub async fn execute(&self, effect: &PendingEffect) -> anyhow::Result<()> {
        match effect {
            PendingEffect::ProvisionDelivery { order_id } => {
                let order = self
                    .orders
                    .load(*order_id)
                    .await
                    .map_err(anyhow::Error::from)?
                    .ok_or(CommandError::NotFound(*order_id))?;
                let delivery = self.provisioner.provision(&order).await?;
                self.metrics.deliveries_provisioned.inc();
                tracing::debug!(order_id = %order_id, delivery_id = %delivery.id, "Provision effect applied");
            }
            PendingEffect::ReverseVouchers {
                order_id,
                subscription_id,
                count,
            } => {
                if self.vouchers.reverse(*subscription_id, *order_id).await?.is_some() {
                    self.metrics.record_vouchers("reversed", *count);
                }
            }
            PendingEffect::ReleaseDriver {
                order_id,
                driver_id,
                completed_at,
            } => {
                self.drivers.release(*driver_id, *order_id, *completed_at).await?;
            }
            PendingEffect::ReleaseSlot { order_id, slot } => {
                self.slots.release(slot, *order_id).await?;
            }
            PendingEffect::MarkDeliveryMilestone {
                order_id,
                milestone,
                at,
                reason,
            } => {
                self.provisioner.record(*order_id, *milestone, *at, reason.clone()).await?;
            }
            PendingEffect::AssignDeliveryDriver { order_id, driver_id, at } => {
                self.provisioner.assign_driver(*order_id, *driver_id, *at).await?;
            }
        }

        Ok(())
    }

    /// Decode and apply one outbox message, recording timing per stage.
    pub async fn process(&self, message: &OutboxMessage, stage: &str) -> anyhow::Result<()> {
        let effect = PendingEffect::from_message(message)?;
        let start = Instant::now();

        let result = self.execute(&effect).await;
        self.metrics
            .record_effect(effect.name(), stage, start.elapsed().as_secs_f64(), result.is_ok());

        result
    }

    /// Best-effort inline pass right after commit. Completed messages leave
    /// the outbox; failures stay pending with their attempt count bumped.
    pub async fn run_inline(&self, messages: &[OutboxMessage]) {
        for message in messages {
            match self.process(message, "inline").await {
                Ok(()) => {
                    if let Err(e) = self.outbox.complete(message.id).await {
                        tracing::warn!(message_id = %message.id, error = %e, "Effect applied but not marked complete");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        order_id = %message.aggregate_id,
                        error = %e,
                        "⚠️ Inline effect failed, leaving it for the outbox relay"
                    );
                    if let Err(store_err) = self.outbox.record_failure(message.id, &e.to_string()).await {
                        tracing::warn!(message_id = %message.id, error = %store_err, "Could not record effect failure");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;

    use crate::domain::meal::{MealType, PackagingType};
    use crate::domain::order::{CancelOrigin, Closure, Lifecycle, LineItem, RefundRecord};

    fn placed(vouchers: u32) -> OrderAggregate {
        let at = Utc::now();
        OrderAggregate {
            id: Uuid::new_v4(),
            version: 1,
            customer_id: Uuid::new_v4(),
            meal_type: MealType::Dinner,
            scheduled_date: NaiveDate::from_ymd_opt(2026, 6, 2).unwrap(),
            packaging: PackagingType::Standard,
            menu_item: LineItem { item_id: Uuid::new_v4(), name: "Thali".into(), price: Decimal::from(180) },
            addons: vec![],
            notes: None,
            total_amount: Decimal::ZERO,
            subscription_used: (vouchers > 0).then(Uuid::new_v4),
            vouchers_consumed: vouchers,
            status: OrderStatus::Placed,
            lifecycle: Lifecycle::new(at),
            closure: None,
            driver_id: None,
            driver_assigned_at: None,
            refund: RefundRecord::default(),
            is_deleted: false,
            deleted_at: None,
            updated_at: at,
        }
    }

    fn moved(from: &OrderAggregate, status: OrderStatus) -> OrderAggregate {
        let mut next = from.clone();
        let at = from.lifecycle.latest() + Duration::minutes(1);
        next.lifecycle.stamp(status, at);
        next.status = status;
        next
    }

    #[test]
    fn test_first_acceptance_provisions_once() {
        let order = placed(0);
        let accepted = moved(&order, OrderStatus::Accepted);
        assert_eq!(
            plan_effects(&order, &accepted),
            vec![PendingEffect::ProvisionDelivery { order_id: order.id }]
        );

        let preparing = moved(&accepted, OrderStatus::Preparing);
        assert!(plan_effects(&accepted, &preparing).is_empty());
    }

    #[test]
    fn test_cancel_before_acceptance_reverses_and_frees_slot() {
        let order = placed(1);
        let mut cancelled = moved(&order, OrderStatus::Cancelled);
        cancelled.closure = Some(Closure {
            by: order.customer_id,
            reason: None,
            cancel_origin: Some(CancelOrigin::Customer),
            failure_origin: None,
        });

        let effects = plan_effects(&order, &cancelled);
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], PendingEffect::ReverseVouchers { count: 1, .. }));
        assert!(matches!(effects[1], PendingEffect::ReleaseSlot { .. }));
    }

    #[test]
    fn test_delivery_failure_stamps_driver_rotation() {
        let driver_id = Uuid::new_v4();
        let mut order = moved(&moved(&moved(&placed(0), OrderStatus::Accepted), OrderStatus::Preparing), OrderStatus::OutForDelivery);
        order.driver_id = Some(driver_id);
        order.driver_assigned_at = Some(order.lifecycle.placed_at);

        let mut failed = moved(&order, OrderStatus::Failed);
        failed.closure = Some(Closure {
            by: driver_id,
            reason: Some("nobody home".into()),
            cancel_origin: None,
            failure_origin: Some(FailureOrigin::DeliveryFailure),
        });

        let effects = plan_effects(&order, &failed);
        assert!(effects.iter().any(|e| matches!(
            e,
            PendingEffect::MarkDeliveryMilestone { milestone: DeliveryMilestone::Failed, reason: Some(r), .. } if r == "nobody home"
        )));
        assert!(effects.iter().any(|e| matches!(
            e,
            PendingEffect::ReleaseDriver { completed_at: Some(_), .. }
        )));
        assert!(!effects.iter().any(|e| matches!(e, PendingEffect::ReverseVouchers { .. })));
    }

    #[test]
    fn test_effect_message_round_trip() {
        let effect = PendingEffect::ReleaseDriver {
            order_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            completed_at: None,
        };
        let message = effect.to_message(Uuid::new_v4()).unwrap();

        assert_eq!(message.kind, EFFECT_KIND);
        assert_eq!(message.aggregate_id, effect.order_id());
        assert!(message.payload.contains("\"effect\":\"RELEASE_DRIVER\""));
        assert_eq!(PendingEffect::from_message(&message).unwrap(), effect);
    }
}
