use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

use crate::domain::meal::{MealType, PackagingType};
use crate::domain::order::{LineItem, OrderAction, OrderAggregate, OrderCommand, OrderSlot, PlaceOrder};
use crate::domain::principal::{Principal, Role};
use super::errors::EngineError;
use super::{forbidden, FulfillmentEngine};

// ============================================================================
// Order Placement
// ============================================================================
//
// Saga:
//   validate → timing → customer → reserve slot → price → voucher → commit
//
// The slot reservation and the voucher draw are undone if any later step
// fails, so a rejected placement leaves no trace.
//
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    /// Required when an operator places on behalf of a customer.
    pub customer_id: Option<Uuid>,

    #[validate(length(min = 1, max = 32))]
    pub meal_type: String,

    pub scheduled_date: NaiveDate,

    pub menu_item_id: Uuid,

    #[serde(default)]
    #[validate(length(max = 20))]
    pub addon_ids: Vec<Uuid>,

    #[serde(default)]
    pub use_voucher: bool,

    pub packaging: Option<String>,

    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Parsed, authorized placement input.
struct Placement {
    order_id: Uuid,
    customer_id: Uuid,
    meal_type: MealType,
    packaging: PackagingType,
    slot: OrderSlot,
}

impl FulfillmentEngine {
    pub async fn place_order(
        &self,
        principal: Principal,
        request: PlaceOrderRequest,
    ) -> Result<OrderAggregate, EngineError> {
        let result = self.try_place(principal, &request).await;

        match &result {
            Ok(order) => {
                self.metrics.record_order_placed(order.meal_type.as_str(), order.vouchers_consumed > 0);
                tracing::info!(
                    order_id = %order.id,
                    customer_id = %order.customer_id,
                    meal_type = %order.meal_type,
                    scheduled_date = %order.scheduled_date,
                    total = %order.total_amount,
                    vouchers = order.vouchers_consumed,
                    "🍱 Order placed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("place_order", err.kind().as_str());
                tracing::info!(principal = %principal, kind = err.kind().as_str(), error = %err, "Placement rejected");
            }
        }

        result
    }

    async fn try_place(&self, principal: Principal, request: &PlaceOrderRequest) -> Result<OrderAggregate, EngineError> {
        request.validate()?;

        let customer_id = match principal.role {
            Role::Customer => match request.customer_id {
                Some(other) if other != principal.id => return Err(forbidden(principal, "order for another customer")),
                _ => principal.id,
            },
            Role::Staff | Role::Admin => request.customer_id.ok_or_else(|| {
                EngineError::Validation("customer_id is required when ordering on behalf of a customer".into())
            })?,
            Role::Driver => return Err(forbidden(principal, "place orders")),
        };

        let meal_type: MealType = request.meal_type.parse()?;
        let packaging: PackagingType = match request.packaging.as_deref() {
            Some(raw) => raw.parse()?,
            None => PackagingType::default(),
        };

        self.timing.can_place(meal_type, request.scheduled_date, self.clock.now_local())?;

        match self.stores.customers.customer(customer_id).await? {
            Some(customer) if customer.is_active => {}
            _ => return Err(EngineError::Unauthorized(format!("customer {customer_id} is unknown or inactive"))),
        }

        let placement = Placement {
            order_id: Uuid::new_v4(),
            customer_id,
            meal_type,
            packaging,
            slot: OrderSlot {
                customer_id,
                meal_type,
                scheduled_date: request.scheduled_date,
                menu_item_id: request.menu_item_id,
            },
        };

        self.reserve_slot(&placement).await?;

        let mut drawn_from: Option<Uuid> = None;
        let result = self.price_and_commit(principal, &placement, request, &mut drawn_from).await;

        if let Err(err) = &result {
            self.compensate_placement(&placement, drawn_from, err).await;
        }

        result
    }

    /// Claim the duplicate guard. A holder whose order already ended (its
    /// release effect still pending) is evicted once.
    async fn reserve_slot(&self, placement: &Placement) -> Result<(), EngineError> {
        let duplicate = || {
            EngineError::ResourceConflict(format!(
                "an order for {} {} on {} with this menu item already exists",
                placement.customer_id, placement.meal_type, placement.slot.scheduled_date
            ))
        };

        let Some(holder) = self.stores.slots.reserve(&placement.slot, placement.order_id).await? else {
            return Ok(());
        };

        let stale = match self.orders.load(holder).await? {
            Some(existing) => existing.is_terminal() || existing.is_deleted,
            // Holder's placement is still in flight.
            None => false,
        };
        if !stale {
            return Err(duplicate());
        }

        tracing::debug!(holder = %holder, slot = %placement.slot.key(), "Evicting stale slot holder");
        self.stores.slots.release(&placement.slot, holder).await?;

        match self.stores.slots.reserve(&placement.slot, placement.order_id).await? {
            None => Ok(()),
            Some(_) => Err(duplicate()),
        }
    }

    async fn price_and_commit(
        &self,
        principal: Principal,
        placement: &Placement,
        request: &PlaceOrderRequest,
        drawn_from: &mut Option<Uuid>,
    ) -> Result<OrderAggregate, EngineError> {
        let item = self
            .stores
            .catalog
            .live_menu_item(request.menu_item_id, placement.meal_type)
            .await?
            .ok_or_else(|| EngineError::not_found("menu item", request.menu_item_id))?;

        let mut seen = HashSet::new();
        if let Some(dup) = request.addon_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EngineError::Validation(format!("addon {dup} listed more than once")));
        }

        let live = self.stores.catalog.live_addons(&request.addon_ids).await?;
        let addons = request
            .addon_ids
            .iter()
            .map(|id| {
                live.iter()
                    .find(|addon| addon.id == *id)
                    .map(|addon| LineItem {
                        item_id: addon.id,
                        name: addon.name.clone(),
                        price: addon.price,
                    })
                    .ok_or_else(|| EngineError::not_found("addon", id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = item.price + addons.iter().map(|a| a.price).sum::<Decimal>();

        let mut vouchers_consumed = 0;
        if request.use_voucher {
            let subscription = self
                .vouchers
                .find_redeemable(placement.customer_id, placement.meal_type)
                .await?
                .ok_or_else(|| EngineError::not_found("subscription", format!("redeemable for customer {}", placement.customer_id)))?;

            self.vouchers
                .consume(subscription.id, placement.order_id, 1, placement.meal_type)
                .await?;
            *drawn_from = Some(subscription.id);
            self.metrics.record_vouchers("consumed", 1);

            vouchers_consumed = 1;
            total = (total - item.price).max(Decimal::ZERO);
        }

        let command = OrderCommand::new(
            principal,
            self.clock.now_utc(),
            OrderAction::Place(PlaceOrder {
                order_id: placement.order_id,
                customer_id: placement.customer_id,
                meal_type: placement.meal_type,
                scheduled_date: request.scheduled_date,
                packaging: placement.packaging,
                menu_item: LineItem {
                    item_id: item.id,
                    name: item.name,
                    price: item.price,
                },
                addons,
                total_amount: total,
                subscription_used: *drawn_from,
                vouchers_consumed,
                notes: request.notes.clone().filter(|n| !n.trim().is_empty()),
            }),
        );

        let committed = self.orders.place(command, Uuid::new_v4()).await?;
        Ok(committed.order)
    }

    async fn compensate_placement(&self, placement: &Placement, drawn_from: Option<Uuid>, cause: &EngineError) {
        tracing::warn!(order_id = %placement.order_id, error = %cause, "Compensating failed placement");

        if let Some(subscription_id) = drawn_from {
            match self.vouchers.reverse(subscription_id, placement.order_id).await {
                Ok(Some(_)) => self.metrics.record_vouchers("reversed", 1),
                Ok(None) => {}
                Err(e) => tracing::error!(
                    order_id = %placement.order_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "❌ Could not return voucher for failed placement"
                ),
            }
        }

        if let Err(e) = self.stores.slots.release(&placement.slot, placement.order_id).await {
            tracing::error!(order_id = %placement.order_id, error = %e, "❌ Could not release order slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::domain::catalog::Customer;
    use crate::domain::order::OrderStatus;
    use crate::domain::subscription::{PlanType, SubscriptionStatus};
    use crate::fulfillment::testkit::world;
    use crate::fulfillment::ErrorKind;

    #[tokio::test]
    async fn test_voucher_order_charges_only_addons() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchAndDinner, 10).await;

        let order = w.engine.place_order(w.customer, w.dinner_request(vec![w.addon], true)).await.unwrap();

        assert_eq!(order.total_amount, Decimal::from(40));
        assert_eq!(order.vouchers_consumed, 1);
        assert_eq!(order.subscription_used, Some(sub.id));
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(w.used_vouchers(sub.id).await, 1);
    }

    #[tokio::test]
    async fn test_cash_order_sums_item_and_addons() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![w.addon], false)).await.unwrap();

        assert_eq!(order.total_amount, Decimal::from(220));
        assert_eq!(order.vouchers_consumed, 0);
        assert!(order.subscription_used.is_none());
    }

    #[tokio::test]
    async fn test_lunch_after_cutoff_rejected() {
        let w = world().await;
        w.clock.advance(Duration::hours(2) + Duration::minutes(30));

        let mut request = w.dinner_request(vec![], false);
        request.meal_type = "LUNCH".into();
        request.menu_item_id = w.lunch_item;

        let err = w.engine.place_order(w.customer, request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_duplicate_order_conflicts_until_first_ends() {
        let w = world().await;
        let first = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();

        let err = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        w.engine.cancel_order(w.customer, first.id, None).await.unwrap();
        assert!(w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_place_one_order() {
        let w = world().await;
        let (a, b) = tokio::join!(
            w.engine.place_order(w.customer, w.dinner_request(vec![], false)),
            w.engine.place_order(w.customer, w.dinner_request(vec![], false)),
        );
        assert!(a.is_ok() ^ b.is_ok());
    }

    #[tokio::test]
    async fn test_missing_addon_fails_whole_request_and_returns_voucher() {
        let w = world().await;
        let sub = w.subscription(PlanType::DinnerOnly, 2).await;

        let err = w
            .engine
            .place_order(w.customer, w.dinner_request(vec![w.addon, Uuid::new_v4()], true))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(w.used_vouchers(sub.id).await, 0);
        // Slot was released with the failed attempt.
        assert!(w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.is_ok());
    }

    #[tokio::test]
    async fn test_plan_mismatch_is_bad_request() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchOnly, 5).await;

        let err = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(w.used_vouchers(sub.id).await, 0);
    }

    #[tokio::test]
    async fn test_voucher_drawn_from_plan_covering_meal() {
        let w = world().await;
        let lunch = crate::domain::subscription::Subscription::new(
            Uuid::new_v4(),
            w.customer.id,
            PlanType::LunchOnly,
            5,
            w.today + chrono::Days::new(3),
        );
        w.backend.subscriptions.put(lunch.clone()).await;
        let dinner = w.subscription(PlanType::DinnerOnly, 5).await;

        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap();
        assert_eq!(order.subscription_used, Some(dinner.id));
        assert_eq!(w.used_vouchers(dinner.id).await, 1);
        assert_eq!(w.used_vouchers(lunch.id).await, 0);
    }

    #[tokio::test]
    async fn test_no_subscription_is_not_found() {
        let w = world().await;
        let err = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_last_voucher_exhausts_subscription() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchAndDinner, 1).await;

        w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap();

        let stored = w.backend.subscriptions.get(sub.id).await.unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Exhausted);
    }

    #[tokio::test]
    async fn test_store_outage_after_voucher_draw_reverses_it() {
        let w = world().await;
        let sub = w.subscription(PlanType::LunchAndDinner, 3).await;
        w.backend.events.fail_next_appends(1);

        let err = w.engine.place_order(w.customer, w.dinner_request(vec![], true)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(w.used_vouchers(sub.id).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_enum_values_rejected() {
        let w = world().await;
        let mut request = w.dinner_request(vec![], false);
        request.packaging = Some("styrofoam".into());
        assert_eq!(w.engine.place_order(w.customer, request).await.unwrap_err().kind(), ErrorKind::BadRequest);

        let mut request = w.dinner_request(vec![], false);
        request.meal_type = "brunch".into();
        assert_eq!(w.engine.place_order(w.customer, request).await.unwrap_err().kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_past_date_rejected() {
        let w = world().await;
        let mut request = w.dinner_request(vec![], false);
        request.scheduled_date = w.today.pred_opt().unwrap();
        assert_eq!(w.engine.place_order(w.customer, request).await.unwrap_err().kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_inactive_customer_unauthorized() {
        let w = world().await;
        let mut customer: Customer = w.backend.customers.get(w.customer.id).await.unwrap();
        customer.is_active = false;
        w.backend.customers.put(customer).await;

        let err = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_operator_places_on_behalf_of_customer() {
        let w = world().await;

        let err = w.engine.place_order(w.staff, w.dinner_request(vec![], false)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let mut request = w.dinner_request(vec![], false);
        request.customer_id = Some(w.customer.id);
        let order = w.engine.place_order(w.staff, request).await.unwrap();
        assert_eq!(order.customer_id, w.customer.id);
    }

    #[tokio::test]
    async fn test_notes_longer_than_limit_rejected() {
        let w = world().await;
        let mut request = w.dinner_request(vec![], false);
        request.notes = Some("x".repeat(501));
        assert_eq!(w.engine.place_order(w.customer, request).await.unwrap_err().kind(), ErrorKind::BadRequest);
    }
}
