use async_trait::async_trait;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::catalog::{Addon, Catalog, Customer, CustomerDirectory, MenuItem};
use crate::domain::delivery::{Delivery, Location};
use crate::domain::driver::DeliveryDriver;
use crate::domain::meal::MealType;
use crate::domain::order::{OrderEvent, OrderSlot};
use crate::domain::subscription::{PlanType, Subscription};
use crate::event_sourcing::store::InMemoryEventStore;
use super::{DeliveryStore, DriverStore, Record, SlotStore, Stores, SubscriptionStore};

// ============================================================================
// In-Memory Backend - tests and local demo runs
// ============================================================================

pub struct MemoryRecords<T> {
    rows: RwLock<HashMap<Uuid, T>>,
}

impl<T> Default for MemoryRecords<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Record> MemoryRecords<T> {
    pub async fn get(&self, id: Uuid) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    /// Unconditional upsert, for seeding.
    pub async fn put(&self, row: T) {
        self.rows.write().await.insert(row.key(), row);
    }

    pub async fn insert_if_absent(&self, row: &T) -> bool {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.key()) {
            return false;
        }
        rows.insert(row.key(), row.clone());
        true
    }

    pub async fn compare_and_set(&self, expected_version: i64, next: &T) -> bool {
        let mut rows = self.rows.write().await;
        match rows.get(&next.key()) {
            Some(current) if current.record_version() == expected_version => {
                rows.insert(next.key(), next.clone());
                true
            }
            _ => false,
        }
    }

    async fn by_lookup(&self, lookup: &str) -> Vec<T> {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| row.lookup().as_deref() == Some(lookup))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryRecords<Subscription> {
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(MemoryRecords::get(self, id).await)
    }

    async fn for_customer(&self, customer_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self.by_lookup(&customer_id.to_string()).await)
    }

    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        Ok(self.insert_if_absent(subscription).await)
    }

    async fn compare_and_set(&self, expected_version: i64, next: &Subscription) -> Result<bool> {
        Ok(MemoryRecords::compare_and_set(self, expected_version, next).await)
    }
}

#[async_trait]
impl DriverStore for MemoryRecords<DeliveryDriver> {
    async fn get(&self, id: Uuid) -> Result<Option<DeliveryDriver>> {
        Ok(MemoryRecords::get(self, id).await)
    }

    async fn list(&self) -> Result<Vec<DeliveryDriver>> {
        Ok(self.all().await)
    }

    async fn insert(&self, driver: &DeliveryDriver) -> Result<bool> {
        Ok(self.insert_if_absent(driver).await)
    }

    async fn compare_and_set(&self, expected_version: i64, next: &DeliveryDriver) -> Result<bool> {
        Ok(MemoryRecords::compare_and_set(self, expected_version, next).await)
    }
}

#[async_trait]
impl DeliveryStore for MemoryRecords<Delivery> {
    async fn by_order(&self, order_id: Uuid) -> Result<Option<Delivery>> {
        Ok(self.get(order_id).await)
    }

    async fn insert_if_absent(&self, delivery: &Delivery) -> Result<bool> {
        Ok(MemoryRecords::insert_if_absent(self, delivery).await)
    }

    async fn compare_and_set(&self, expected_version: i64, next: &Delivery) -> Result<bool> {
        Ok(MemoryRecords::compare_and_set(self, expected_version, next).await)
    }
}

#[async_trait]
impl CustomerDirectory for MemoryRecords<Customer> {
    async fn customer(&self, id: Uuid) -> Result<Option<Customer>> {
        Ok(self.get(id).await)
    }

    async fn customer_by_external_identity(&self, uid: &str) -> Result<Option<Customer>> {
        Ok(self.by_lookup(uid).await.into_iter().next())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    pub menu_items: MemoryRecords<MenuItem>,
    pub addons: MemoryRecords<Addon>,
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn live_menu_item(&self, id: Uuid, meal_type: MealType) -> Result<Option<MenuItem>> {
        Ok(self
            .menu_items
            .get(id)
            .await
            .filter(|item| item.is_live && !item.is_deleted && item.meal_type == meal_type))
    }

    async fn live_addons(&self, ids: &[Uuid]) -> Result<Vec<Addon>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(addon) = self.addons.get(*id).await {
                if addon.is_live && !addon.is_deleted {
                    found.push(addon);
                }
            }
        }
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemorySlots {
    rows: RwLock<HashMap<OrderSlot, Uuid>>,
}

#[async_trait]
impl SlotStore for MemorySlots {
    async fn reserve(&self, slot: &OrderSlot, order_id: Uuid) -> Result<Option<Uuid>> {
        let mut rows = self.rows.write().await;
        if let Some(holder) = rows.get(slot) {
            return Ok(Some(*holder));
        }
        rows.insert(slot.clone(), order_id);
        Ok(None)
    }

    async fn release(&self, slot: &OrderSlot, order_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.write().await;
        if rows.get(slot) == Some(&order_id) {
            rows.remove(slot);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Concrete in-memory stores, kept addressable for seeding and assertions.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub events: Arc<InMemoryEventStore<OrderEvent>>,
    pub subscriptions: Arc<MemoryRecords<Subscription>>,
    pub drivers: Arc<MemoryRecords<DeliveryDriver>>,
    pub deliveries: Arc<MemoryRecords<Delivery>>,
    pub slots: Arc<MemorySlots>,
    pub catalog: Arc<MemoryCatalog>,
    pub customers: Arc<MemoryRecords<Customer>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            orders: self.events.clone(),
            outbox: self.events.clone(),
            subscriptions: self.subscriptions.clone(),
            drivers: self.drivers.clone(),
            deliveries: self.deliveries.clone(),
            slots: self.slots.clone(),
            catalog: self.catalog.clone(),
            customers: self.customers.clone(),
        }
    }

    /// Populate a runnable demo: one customer with a subscription, a lunch
    /// and a dinner item, an addon and two drivers. Ids are logged.
    pub async fn seed_demo(&self, today: chrono::NaiveDate) {
        let customer_id = Uuid::new_v4();
        self.customers
            .put(Customer {
                id: customer_id,
                external_uid: "demo-customer".to_string(),
                name: "Demo Customer".to_string(),
                is_active: true,
                address: Some(Location {
                    address: "221B Baker Street".to_string(),
                    coordinates: None,
                }),
            })
            .await;

        let subscription = Subscription::new(
            Uuid::new_v4(),
            customer_id,
            PlanType::LunchAndDinner,
            20,
            today + chrono::Days::new(30),
        );
        let subscription_id = subscription.id;
        self.subscriptions.put(subscription).await;

        let mut menu = Vec::new();
        for (name, meal_type, price) in [("Rajma Chawal", MealType::Lunch, 150), ("Paneer Thali", MealType::Dinner, 180)] {
            let item = MenuItem {
                id: Uuid::new_v4(),
                name: name.to_string(),
                meal_type,
                price: rust_decimal::Decimal::from(price),
                is_live: true,
                is_deleted: false,
            };
            menu.push((meal_type, item.id));
            self.catalog.menu_items.put(item).await;
        }

        let addon_id = Uuid::new_v4();
        self.catalog
            .addons
            .put(Addon {
                id: addon_id,
                name: "Gulab Jamun".to_string(),
                price: rust_decimal::Decimal::from(40),
                is_live: true,
                is_deleted: false,
            })
            .await;

        for name in ["Ravi", "Meena"] {
            self.drivers.put(DeliveryDriver::new(Uuid::new_v4(), name)).await;
        }

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %subscription_id,
            menu = ?menu,
            addon_id = %addon_id,
            "🌱 Seeded in-memory demo data"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::PlanType;
    use chrono::{NaiveDate, Utc};

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = MemoryRecords::<Subscription>::default();
        let sub = Subscription::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PlanType::LunchOnly,
            2,
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        );
        assert!(SubscriptionStore::insert(&store, &sub).await.unwrap());
        assert!(!SubscriptionStore::insert(&store, &sub).await.unwrap());

        let today = NaiveDate::from_ymd_opt(2029, 1, 1).unwrap();
        let first = sub.consume(Uuid::new_v4(), 1, MealType::Lunch, today, Utc::now()).unwrap();
        let second = sub.consume(Uuid::new_v4(), 1, MealType::Lunch, today, Utc::now()).unwrap();

        assert!(SubscriptionStore::compare_and_set(&store, sub.version, &first).await.unwrap());
        assert!(!SubscriptionStore::compare_and_set(&store, sub.version, &second).await.unwrap());

        let stored = SubscriptionStore::get(&store, sub.id).await.unwrap().unwrap();
        assert_eq!(stored.used_vouchers, 1);
        assert_eq!(store.for_customer(sub.customer_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_slot_reservation_is_exclusive() {
        let slots = MemorySlots::default();
        let slot = OrderSlot {
            customer_id: Uuid::new_v4(),
            meal_type: MealType::Dinner,
            scheduled_date: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
            menu_item_id: Uuid::new_v4(),
        };
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(slots.reserve(&slot, first).await.unwrap(), None);
        assert_eq!(slots.reserve(&slot, second).await.unwrap(), Some(first));
        assert!(!slots.release(&slot, second).await.unwrap());
        assert!(slots.release(&slot, first).await.unwrap());
        assert_eq!(slots.reserve(&slot, second).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_catalog_hides_unavailable_entries() {
        let catalog = MemoryCatalog::default();
        let live = MenuItem {
            id: Uuid::new_v4(),
            name: "Paneer".into(),
            meal_type: MealType::Lunch,
            price: 150.into(),
            is_live: true,
            is_deleted: false,
        };
        catalog.menu_items.put(live.clone()).await;
        let retired = Addon { id: Uuid::new_v4(), name: "Papad".into(), price: 10.into(), is_live: false, is_deleted: false };
        catalog.addons.put(retired.clone()).await;

        assert!(catalog.live_menu_item(live.id, MealType::Lunch).await.unwrap().is_some());
        assert!(catalog.live_menu_item(live.id, MealType::Dinner).await.unwrap().is_none());
        assert!(catalog.live_addons(&[retired.id]).await.unwrap().is_empty());
    }
}
