use std::sync::Arc;
use uuid::Uuid;

use crate::domain::meal::MealType;
use crate::domain::subscription::{Subscription, VoucherError};
use crate::domain::timing::ServiceClock;
use crate::store::SubscriptionStore;
use super::errors::EngineError;

// ============================================================================
// Voucher Ledger - the only writer of subscription balances
// ============================================================================
//
// consume / reverse are read → decide → compare-and-set loops. The decision
// is the pure Subscription transition; the CAS makes it atomic per record.
//
// ============================================================================

const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct VoucherLedger {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn ServiceClock>,
}

impl VoucherLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn ServiceClock>) -> Self {
        Self { store, clock }
    }

    pub async fn balance(&self, subscription_id: Uuid) -> Result<Subscription, EngineError> {
        self.store
            .get(subscription_id)
            .await?
            .ok_or_else(|| VoucherError::NotFound(subscription_id).into())
    }

    /// The customer's usable subscription covering `meal_type`, earliest
    /// expiry first. A plan mismatch is reported only when the customer has
    /// usable subscriptions and none of them covers the meal.
    pub async fn find_redeemable(
        &self,
        customer_id: Uuid,
        meal_type: MealType,
    ) -> Result<Option<Subscription>, EngineError> {
        let today = self.clock.today();

        let mut usable: Vec<Subscription> = self
            .store
            .for_customer(customer_id)
            .await?
            .into_iter()
            .filter(|s| s.is_redeemable(today))
            .collect();
        usable.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then_with(|| a.id.cmp(&b.id)));

        let Some(earliest) = usable.first() else {
            return Ok(None);
        };
        let plan = earliest.plan_type;

        match usable.into_iter().find(|s| s.plan_type.covers(meal_type)) {
            Some(subscription) => Ok(Some(subscription)),
            None => Err(VoucherError::PlanMismatch { plan, meal_type }.into()),
        }
    }

    /// Draw `count` vouchers for `order_id`.
    pub async fn consume(
        &self,
        subscription_id: Uuid,
        order_id: Uuid,
        count: u32,
        meal_type: MealType,
    ) -> Result<Subscription, EngineError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.balance(subscription_id).await?;
            let next = current.consume(order_id, count, meal_type, self.clock.today(), self.clock.now_utc())?;

            if self.store.compare_and_set(current.version, &next).await? {
                tracing::info!(
                    subscription_id = %subscription_id,
                    order_id = %order_id,
                    used = next.used_vouchers,
                    total = next.total_vouchers,
                    status = %next.status,
                    "🎟️ Vouchers consumed"
                );
                return Ok(next);
            }

            tracing::debug!(subscription_id = %subscription_id, attempt = attempt, "Subscription changed, retrying consume");
        }

        Err(VoucherError::Contended(subscription_id).into())
    }

    /// Return the vouchers drawn for `order_id`. `None` when they were never
    /// drawn or were already returned.
    pub async fn reverse(&self, subscription_id: Uuid, order_id: Uuid) -> Result<Option<Subscription>, EngineError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.balance(subscription_id).await?;
            let Some(next) = current.reverse(order_id, self.clock.today(), self.clock.now_utc()) else {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    order_id = %order_id,
                    "No outstanding redemption to reverse"
                );
                return Ok(None);
            };

            if self.store.compare_and_set(current.version, &next).await? {
                tracing::info!(
                    subscription_id = %subscription_id,
                    order_id = %order_id,
                    used = next.used_vouchers,
                    status = %next.status,
                    "↩️ Vouchers reversed"
                );
                return Ok(Some(next));
            }

            tracing::debug!(subscription_id = %subscription_id, attempt = attempt, "Subscription changed, retrying reverse");
        }

        Err(VoucherError::Contended(subscription_id).into())
    }
}
