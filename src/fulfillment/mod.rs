use std::sync::Arc;
use uuid::Uuid;

use crate::domain::delivery::Location;
use crate::domain::order::{
    CommandError, OrderAction, OrderAggregate, OrderCommand, OrderCommandHandler, OrderStatus,
};
use crate::domain::principal::Principal;
use crate::domain::subscription::Subscription;
use crate::domain::timing::{Cutoffs, ServiceClock, TimingPolicy};
use crate::metrics::Metrics;
use crate::store::Stores;

// ============================================================================
// Fulfillment Engine
// ============================================================================
//
// Request-driven orchestration across orders, subscriptions, deliveries and
// drivers. Each operation:
//   1. checks the principal
//   2. runs the order command through the aggregate guards
//   3. commits events + planned effects in one append
//   4. applies the effects inline, best-effort
//
// Multi-record work before the order commit (placement, driver claims) is a
// saga with explicit compensation.
//
// ============================================================================

pub mod errors;
pub mod vouchers;
pub mod drivers;
pub mod provisioning;
pub mod effects;
pub mod placement;
pub mod lifecycle;
pub mod dispatch;
pub mod refunds;

pub use errors::{EngineError, ErrorKind};
pub use vouchers::VoucherLedger;
pub use drivers::DriverRegistry;
pub use provisioning::DeliveryProvisioner;
pub use effects::{plan_effects, EffectExecutor, PendingEffect, EFFECT_KIND};
pub use placement::PlaceOrderRequest;
pub use lifecycle::AdminCancel;
pub use dispatch::DeliveryProgress;
pub use refunds::RefundDecision;

/// Order commits retried when another writer moved the stream first.
const MAX_COMMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cutoffs: Cutoffs,
    /// Pickup point for every delivery.
    pub kitchen: Location,
}

#[derive(Clone)]
pub struct FulfillmentEngine {
    stores: Stores,
    orders: Arc<OrderCommandHandler>,
    vouchers: VoucherLedger,
    drivers: DriverRegistry,
    provisioner: DeliveryProvisioner,
    effects: Arc<EffectExecutor>,
    timing: TimingPolicy,
    clock: Arc<dyn ServiceClock>,
    metrics: Arc<Metrics>,
}

impl FulfillmentEngine {
    pub fn new(stores: Stores, settings: EngineSettings, clock: Arc<dyn ServiceClock>, metrics: Arc<Metrics>) -> Self {
        let orders = Arc::new(OrderCommandHandler::new(stores.orders.clone()));
        let vouchers = VoucherLedger::new(stores.subscriptions.clone(), clock.clone());
        let drivers = DriverRegistry::new(stores.drivers.clone());
        let provisioner = DeliveryProvisioner::new(
            stores.deliveries.clone(),
            stores.customers.clone(),
            settings.kitchen,
            clock.clone(),
        );
        let effects = Arc::new(EffectExecutor::new(
            orders.clone(),
            vouchers.clone(),
            drivers.clone(),
            provisioner.clone(),
            stores.slots.clone(),
            stores.outbox.clone(),
            metrics.clone(),
        ));

        Self {
            stores,
            orders,
            vouchers,
            drivers,
            provisioner,
            effects,
            timing: TimingPolicy::new(settings.cutoffs),
            clock,
            metrics,
        }
    }

    pub fn effects(&self) -> Arc<EffectExecutor> {
        self.effects.clone()
    }

    pub fn vouchers(&self) -> &VoucherLedger {
        &self.vouchers
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Fetch an order visible to `principal`: its customer, operators, or
    /// the driver bound to it. Deleted orders are only visible to admins.
    pub async fn get_order(&self, principal: Principal, order_id: Uuid) -> Result<OrderAggregate, EngineError> {
        let order = self.load_order(order_id).await?;

        if order.is_deleted && !principal.is_admin() {
            return Err(EngineError::not_found("order", order_id));
        }

        let visible = principal.is_operator()
            || principal.is_customer(order.customer_id)
            || (principal.role == crate::domain::principal::Role::Driver && order.driver_id == Some(principal.id));

        if !visible {
            return Err(EngineError::Forbidden(format!("{principal} may not view order {order_id}")));
        }

        Ok(order)
    }

    /// Subscription balance as seen by its owner or an operator.
    pub async fn subscription_balance(
        &self,
        principal: Principal,
        subscription_id: Uuid,
    ) -> Result<Subscription, EngineError> {
        let subscription = self.vouchers.balance(subscription_id).await?;

        if !principal.is_operator() && !principal.is_customer(subscription.customer_id) {
            return Err(EngineError::Forbidden(format!(
                "{principal} may not view subscription {subscription_id}"
            )));
        }

        Ok(subscription)
    }

    /// Customer principal for an identity issued by the auth provider.
    pub async fn resolve_customer(&self, external_uid: &str) -> Result<Principal, EngineError> {
        match self.stores.customers.customer_by_external_identity(external_uid).await? {
            Some(customer) if customer.is_active => Ok(Principal::customer(customer.id)),
            _ => Err(EngineError::Unauthorized(format!(
                "no active customer for identity {external_uid}"
            ))),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<OrderAggregate, EngineError> {
        self.orders
            .load(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("order", order_id))
    }

    /// Run one order command: guards, commit with planned effects, inline
    /// effect pass. Lost version races are retried against fresh state.
    async fn run(
        &self,
        order_id: Uuid,
        issued_by: Principal,
        action: OrderAction,
        operation: &'static str,
    ) -> Result<OrderAggregate, EngineError> {
        let correlation_id = Uuid::new_v4();
        let mut attempt = 0;

        let committed = loop {
            attempt += 1;
            let command = OrderCommand::new(issued_by, self.clock.now_utc(), action.clone());
            let mut moved_to: Option<OrderStatus> = None;

            let result = self
                .orders
                .execute(order_id, command, correlation_id, |before, after| {
                    if before.status != after.status {
                        moved_to = Some(after.status);
                    }
                    effects::plan_messages(before, after, correlation_id)
                })
                .await;

            match result {
                Ok(committed) => {
                    if let Some(status) = moved_to {
                        self.metrics.record_transition(status.as_str());
                    }
                    break committed;
                }
                Err(CommandError::Conflict(conflict)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(
                        order_id = %order_id,
                        expected = conflict.expected,
                        actual = conflict.actual,
                        attempt = attempt,
                        "Order stream moved, retrying {}", operation
                    );
                }
                Err(e) => {
                    let err = EngineError::from(e);
                    self.reject(operation, order_id, &err);
                    return Err(err);
                }
            }
        };

        tracing::info!(
            order_id = %order_id,
            operation = operation,
            status = %committed.order.status,
            version = committed.order.version,
            by = %issued_by,
            "✅ Order command committed"
        );

        self.effects.run_inline(&committed.outbox).await;

        Ok(committed.order)
    }

    fn reject(&self, operation: &str, order_id: Uuid, err: &EngineError) {
        self.metrics.record_rejection(operation, err.kind().as_str());
        tracing::info!(
            order_id = %order_id,
            operation = operation,
            kind = err.kind().as_str(),
            error = %err,
            "Order command rejected"
        );
    }
}

fn forbidden(principal: Principal, action: &str) -> EngineError {
    EngineError::Forbidden(format!("{principal} may not {action}"))
}

// ============================================================================
// Test fixtures shared by the engine tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::testkit::world;
    use super::*;

    #[tokio::test]
    async fn test_get_order_visibility() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();

        assert!(w.engine.get_order(w.customer, order.id).await.is_ok());
        assert!(w.engine.get_order(w.staff, order.id).await.is_ok());

        let stranger = Principal::customer(Uuid::new_v4());
        let err = w.engine.get_order(stranger, order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let missing = w.engine.get_order(w.staff, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_deleted_order_hidden_from_non_admins() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();
        w.engine.cancel_order(w.customer, order.id, None).await.unwrap();
        w.engine.soft_delete(w.admin, order.id).await.unwrap();

        assert_eq!(w.engine.get_order(w.staff, order.id).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(w.engine.get_order(w.admin, order.id).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_subscription_balance_is_owner_only() {
        let w = world().await;
        let sub = w.subscription(crate::domain::subscription::PlanType::DinnerOnly, 4).await;

        assert_eq!(w.engine.subscription_balance(w.customer, sub.id).await.unwrap().remaining(), 4);
        let other = Principal::customer(Uuid::new_v4());
        assert_eq!(
            w.engine.subscription_balance(other, sub.id).await.unwrap_err().kind(),
            ErrorKind::Forbidden
        );
    }
}
