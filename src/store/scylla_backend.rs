use async_trait::async_trait;
use anyhow::Result;
use scylla::client::session::Session;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::catalog::{Addon, Catalog, Customer, CustomerDirectory, MenuItem};
use crate::domain::delivery::Delivery;
use crate::domain::driver::DeliveryDriver;
use crate::domain::meal::MealType;
use crate::domain::order::{OrderEvent, OrderSlot};
use crate::domain::subscription::Subscription;
use crate::event_sourcing::store::scylla_store::lwt_applied;
use crate::event_sourcing::store::ScyllaEventStore;
use super::{DeliveryStore, DriverStore, Record, SlotStore, Stores, SubscriptionStore};

// ============================================================================
// Scylla Backend - versioned documents with lightweight transactions
// ============================================================================
//
// Each record table has the shape (id, lookup, version, data). Inserts use
// IF NOT EXISTS and updates use IF version = ?, so the conditional-write
// contract of the store traits maps onto a single LWT per call.
//
// ============================================================================

pub struct ScyllaDocuments<T> {
    session: Arc<Session>,
    table: &'static str,
    _phantom: PhantomData<T>,
}

impl<T: Record> ScyllaDocuments<T> {
    pub fn new(session: Arc<Session>, table: &'static str) -> Self {
        Self {
            session,
            table,
            _phantom: PhantomData,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<T>> {
        let result = self.session
            .query_unpaged(format!("SELECT data FROM {} WHERE id = ?", self.table), (id,))
            .await?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows.maybe_first_row::<(String,)>()? {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn all(&self) -> Result<Vec<T>> {
        let result = self.session
            .query_unpaged(format!("SELECT data FROM {}", self.table), &[])
            .await?;
        Self::decode_rows(result)
    }

    pub async fn by_lookup(&self, lookup: &str) -> Result<Vec<T>> {
        let result = self.session
            .query_unpaged(format!("SELECT data FROM {} WHERE lookup = ?", self.table), (lookup,))
            .await?;
        Self::decode_rows(result)
    }

    pub async fn insert_if_absent(&self, row: &T) -> Result<bool> {
        let result = self.session
            .query_unpaged(
                format!(
                    "INSERT INTO {} (id, lookup, version, data) VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    self.table
                ),
                (row.key(), row.lookup(), row.record_version(), serde_json::to_string(row)?),
            )
            .await?;
        lwt_applied(result)
    }

    pub async fn compare_and_set(&self, expected_version: i64, next: &T) -> Result<bool> {
        let result = self.session
            .query_unpaged(
                format!(
                    "UPDATE {} SET version = ?, data = ?, lookup = ? WHERE id = ? IF version = ?",
                    self.table
                ),
                (
                    next.record_version(),
                    serde_json::to_string(next)?,
                    next.lookup(),
                    next.key(),
                    expected_version,
                ),
            )
            .await?;
        lwt_applied(result)
    }

    fn decode_rows(result: scylla::response::query_result::QueryResult) -> Result<Vec<T>> {
        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        rows.rows::<(String,)>()?
            .map(|row| {
                let (data,) = row?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }
}

#[async_trait]
impl SubscriptionStore for ScyllaDocuments<Subscription> {
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        ScyllaDocuments::get(self, id).await
    }

    async fn for_customer(&self, customer_id: Uuid) -> Result<Vec<Subscription>> {
        self.by_lookup(&customer_id.to_string()).await
    }

    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        self.insert_if_absent(subscription).await
    }

    async fn compare_and_set(&self, expected_version: i64, next: &Subscription) -> Result<bool> {
        ScyllaDocuments::compare_and_set(self, expected_version, next).await
    }
}

#[async_trait]
impl DriverStore for ScyllaDocuments<DeliveryDriver> {
    async fn get(&self, id: Uuid) -> Result<Option<DeliveryDriver>> {
        ScyllaDocuments::get(self, id).await
    }

    async fn list(&self) -> Result<Vec<DeliveryDriver>> {
        self.all().await
    }

    async fn insert(&self, driver: &DeliveryDriver) -> Result<bool> {
        self.insert_if_absent(driver).await
    }

    async fn compare_and_set(&self, expected_version: i64, next: &DeliveryDriver) -> Result<bool> {
        ScyllaDocuments::compare_and_set(self, expected_version, next).await
    }
}

#[async_trait]
impl DeliveryStore for ScyllaDocuments<Delivery> {
    async fn by_order(&self, order_id: Uuid) -> Result<Option<Delivery>> {
        self.get(order_id).await
    }

    async fn insert_if_absent(&self, delivery: &Delivery) -> Result<bool> {
        ScyllaDocuments::insert_if_absent(self, delivery).await
    }

    async fn compare_and_set(&self, expected_version: i64, next: &Delivery) -> Result<bool> {
        ScyllaDocuments::compare_and_set(self, expected_version, next).await
    }
}

#[async_trait]
impl CustomerDirectory for ScyllaDocuments<Customer> {
    async fn customer(&self, id: Uuid) -> Result<Option<Customer>> {
        self.get(id).await
    }

    async fn customer_by_external_identity(&self, uid: &str) -> Result<Option<Customer>> {
        Ok(self.by_lookup(uid).await?.into_iter().next())
    }
}

pub struct ScyllaCatalog {
    menu_items: ScyllaDocuments<MenuItem>,
    addons: ScyllaDocuments<Addon>,
}

impl ScyllaCatalog {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            menu_items: ScyllaDocuments::new(session.clone(), "menu_items"),
            addons: ScyllaDocuments::new(session, "addons"),
        }
    }
}

#[async_trait]
impl Catalog for ScyllaCatalog {
    async fn live_menu_item(&self, id: Uuid, meal_type: MealType) -> Result<Option<MenuItem>> {
        Ok(self
            .menu_items
            .get(id)
            .await?
            .filter(|item| item.is_live && !item.is_deleted && item.meal_type == meal_type))
    }

    async fn live_addons(&self, ids: &[Uuid]) -> Result<Vec<Addon>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(addon) = self.addons.get(*id).await? {
                if addon.is_live && !addon.is_deleted {
                    found.push(addon);
                }
            }
        }
        Ok(found)
    }
}

pub struct ScyllaSlots {
    session: Arc<Session>,
}

impl ScyllaSlots {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn holder(&self, key: &str) -> Result<Option<Uuid>> {
        let result = self.session
            .query_unpaged("SELECT order_id FROM order_slots WHERE slot_key = ?", (key,))
            .await?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        Ok(rows.maybe_first_row::<(Uuid,)>()?.map(|(order_id,)| order_id))
    }
}

#[async_trait]
impl SlotStore for ScyllaSlots {
    async fn reserve(&self, slot: &OrderSlot, order_id: Uuid) -> Result<Option<Uuid>> {
        let key = slot.key();
        let result = self.session
            .query_unpaged(
                "INSERT INTO order_slots (slot_key, order_id, reserved_at) VALUES (?, ?, ?) IF NOT EXISTS",
                (key.as_str(), order_id, chrono::Utc::now()),
            )
            .await?;

        if lwt_applied(result)? {
            return Ok(None);
        }

        // Lost to a holder that may have released in between; report it as
        // taken either way and let the caller decide.
        Ok(Some(self.holder(&key).await?.unwrap_or(order_id)))
    }

    async fn release(&self, slot: &OrderSlot, order_id: Uuid) -> Result<bool> {
        let result = self.session
            .query_unpaged(
                "DELETE FROM order_slots WHERE slot_key = ? IF order_id = ?",
                (slot.key(), order_id),
            )
            .await?;
        lwt_applied(result)
    }
}

/// Stores backed by one Scylla session.
pub struct ScyllaBackend;

impl ScyllaBackend {
    pub fn stores(session: Arc<Session>) -> Stores {
        let events = Arc::new(ScyllaEventStore::<OrderEvent>::new(session.clone(), "Order"));

        Stores {
            orders: events.clone(),
            outbox: events,
            subscriptions: Arc::new(ScyllaDocuments::<Subscription>::new(session.clone(), "subscriptions")),
            drivers: Arc::new(ScyllaDocuments::<DeliveryDriver>::new(session.clone(), "delivery_drivers")),
            deliveries: Arc::new(ScyllaDocuments::<Delivery>::new(session.clone(), "deliveries")),
            slots: Arc::new(ScyllaSlots::new(session.clone())),
            catalog: Arc::new(ScyllaCatalog::new(session.clone())),
            customers: Arc::new(ScyllaDocuments::<Customer>::new(session, "customers")),
        }
    }
}
