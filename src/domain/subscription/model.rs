use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::meal::MealType;
use super::errors::VoucherError;

// ============================================================================
// Subscription - prepaid voucher pool
// ============================================================================
//
// Balance changes are pure functions returning the next state with a bumped
// version. Stores persist them with compare-and-set on that version, so a
// lost race never double-spends and a replayed reversal never double-credits.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    LunchOnly,
    DinnerOnly,
    LunchAndDinner,
}

impl PlanType {
    pub fn covers(&self, meal_type: MealType) -> bool {
        match self {
            PlanType::LunchOnly => meal_type == MealType::Lunch,
            PlanType::DinnerOnly => meal_type == MealType::Dinner,
            PlanType::LunchAndDinner => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Exhausted,
    Expired,
    Cancelled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Exhausted => "EXHAUSTED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// "Vouchers consumed for order X", recorded in the same write as the
/// balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    pub count: u32,
    pub consumed_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_type: PlanType,
    pub total_vouchers: u32,
    pub used_vouchers: u32,
    pub status: SubscriptionStatus,
    pub expiry_date: NaiveDate,
    pub is_deleted: bool,
    pub redemptions: BTreeMap<Uuid, Redemption>,
    pub version: i64,
}

impl Subscription {
    pub fn new(
        id: Uuid,
        customer_id: Uuid,
        plan_type: PlanType,
        total_vouchers: u32,
        expiry_date: NaiveDate,
    ) -> Self {
        Self {
            id,
            customer_id,
            plan_type,
            total_vouchers,
            used_vouchers: 0,
            status: if total_vouchers == 0 {
                SubscriptionStatus::Exhausted
            } else {
                SubscriptionStatus::Active
            },
            expiry_date,
            is_deleted: false,
            redemptions: BTreeMap::new(),
            version: 1,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total_vouchers.saturating_sub(self.used_vouchers)
    }

    /// A subscription is usable through its expiry date inclusive.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today > self.expiry_date
    }

    pub fn is_redeemable(&self, today: NaiveDate) -> bool {
        !self.is_deleted
            && self.status == SubscriptionStatus::Active
            && !self.is_expired(today)
            && self.remaining() > 0
    }

    pub fn redemption_for(&self, order_id: Uuid) -> Option<&Redemption> {
        self.redemptions.get(&order_id)
    }

    /// Next state after drawing `count` vouchers for `order_id`.
    pub fn consume(
        &self,
        order_id: Uuid,
        count: u32,
        meal_type: MealType,
        today: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Subscription, VoucherError> {
        if count == 0 {
            return Err(VoucherError::InvalidCount);
        }
        if self.is_deleted {
            return Err(VoucherError::Deleted(self.id));
        }
        if self.is_expired(today) {
            return Err(VoucherError::Expired(self.expiry_date));
        }
        if self.status != SubscriptionStatus::Active {
            return Err(VoucherError::NotActive(self.status));
        }
        if !self.plan_type.covers(meal_type) {
            return Err(VoucherError::PlanMismatch { plan: self.plan_type, meal_type });
        }
        if self.redemptions.contains_key(&order_id) {
            return Err(VoucherError::AlreadyRedeemed(order_id));
        }
        if count > self.remaining() {
            return Err(VoucherError::InsufficientBalance {
                remaining: self.remaining(),
                requested: count,
            });
        }

        let mut next = self.clone();
        next.used_vouchers += count;
        if next.used_vouchers == next.total_vouchers {
            next.status = SubscriptionStatus::Exhausted;
        }
        next.redemptions.insert(
            order_id,
            Redemption {
                count,
                consumed_at: at,
                reversed_at: None,
            },
        );
        next.version += 1;

        Ok(next)
    }

    /// Next state after returning the vouchers drawn for `order_id`, or
    /// `None` when there is nothing left to return for that order.
    pub fn reverse(
        &self,
        order_id: Uuid,
        today: NaiveDate,
        at: DateTime<Utc>,
    ) -> Option<Subscription> {
        let redemption = self.redemptions.get(&order_id)?;
        if redemption.reversed_at.is_some() {
            return None;
        }

        let mut next = self.clone();
        next.used_vouchers = next.used_vouchers.saturating_sub(redemption.count);

        if next.status == SubscriptionStatus::Exhausted && next.used_vouchers < next.total_vouchers {
            next.status = if next.is_expired(today) {
                SubscriptionStatus::Expired
            } else {
                SubscriptionStatus::Active
            };
        }

        if let Some(entry) = next.redemptions.get_mut(&order_id) {
            entry.reversed_at = Some(at);
        }
        next.version += 1;

        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn plan(total: u32, plan_type: PlanType) -> Subscription {
        Subscription::new(Uuid::new_v4(), Uuid::new_v4(), plan_type, total, today() + chrono::Days::new(20))
    }

    #[test]
    fn test_consume_to_boundary_exhausts() {
        let sub = plan(1, PlanType::LunchAndDinner);
        let next = sub.consume(Uuid::new_v4(), 1, MealType::Dinner, today(), Utc::now()).unwrap();

        assert_eq!(next.used_vouchers, 1);
        assert_eq!(next.status, SubscriptionStatus::Exhausted);
        assert_eq!(next.version, sub.version + 1);

        let err = next.consume(Uuid::new_v4(), 1, MealType::Dinner, today(), Utc::now()).unwrap_err();
        assert_eq!(err, VoucherError::NotActive(SubscriptionStatus::Exhausted));
    }

    #[test]
    fn test_consume_rejects_overdraw_and_plan_mismatch() {
        let sub = plan(2, PlanType::LunchOnly);
        let err = sub.consume(Uuid::new_v4(), 3, MealType::Lunch, today(), Utc::now()).unwrap_err();
        assert_eq!(err, VoucherError::InsufficientBalance { remaining: 2, requested: 3 });

        let err = sub.consume(Uuid::new_v4(), 1, MealType::Dinner, today(), Utc::now()).unwrap_err();
        assert!(matches!(err, VoucherError::PlanMismatch { .. }));

        let err = sub.consume(Uuid::new_v4(), 0, MealType::Lunch, today(), Utc::now()).unwrap_err();
        assert_eq!(err, VoucherError::InvalidCount);
    }

    #[test]
    fn test_consume_once_per_order() {
        let sub = plan(5, PlanType::LunchAndDinner);
        let order = Uuid::new_v4();
        let next = sub.consume(order, 1, MealType::Lunch, today(), Utc::now()).unwrap();
        let err = next.consume(order, 1, MealType::Lunch, today(), Utc::now()).unwrap_err();
        assert_eq!(err, VoucherError::AlreadyRedeemed(order));
    }

    #[test]
    fn test_expired_subscription_cannot_be_drawn() {
        let mut sub = plan(5, PlanType::LunchAndDinner);
        sub.expiry_date = today() - chrono::Days::new(1);
        assert!(!sub.is_redeemable(today()));
        let err = sub.consume(Uuid::new_v4(), 1, MealType::Lunch, today(), Utc::now()).unwrap_err();
        assert!(matches!(err, VoucherError::Expired(_)));
    }

    #[test]
    fn test_reverse_is_exactly_once_and_reactivates() {
        let sub = plan(1, PlanType::LunchAndDinner);
        let order = Uuid::new_v4();
        let consumed = sub.consume(order, 1, MealType::Lunch, today(), Utc::now()).unwrap();

        let reversed = consumed.reverse(order, today(), Utc::now()).unwrap();
        assert_eq!(reversed.used_vouchers, 0);
        assert_eq!(reversed.status, SubscriptionStatus::Active);
        assert!(reversed.redemption_for(order).unwrap().reversed_at.is_some());

        assert!(reversed.reverse(order, today(), Utc::now()).is_none());
        assert!(reversed.reverse(Uuid::new_v4(), today(), Utc::now()).is_none());
    }

    #[test]
    fn test_reverse_after_expiry_lands_in_expired() {
        let sub = plan(1, PlanType::LunchAndDinner);
        let order = Uuid::new_v4();
        let consumed = sub.consume(order, 1, MealType::Lunch, today(), Utc::now()).unwrap();

        let later = consumed.expiry_date + chrono::Days::new(1);
        let reversed = consumed.reverse(order, later, Utc::now()).unwrap();
        assert_eq!(reversed.used_vouchers, 0);
        assert_eq!(reversed.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn test_reverse_keeps_cancelled_status() {
        let sub = plan(3, PlanType::LunchAndDinner);
        let order = Uuid::new_v4();
        let mut consumed = sub.consume(order, 1, MealType::Lunch, today(), Utc::now()).unwrap();
        consumed.status = SubscriptionStatus::Cancelled;

        let reversed = consumed.reverse(order, today(), Utc::now()).unwrap();
        assert_eq!(reversed.status, SubscriptionStatus::Cancelled);
        assert_eq!(reversed.used_vouchers, 0);
    }
}
