use async_trait::async_trait;
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::catalog::{Addon, Catalog, Customer, CustomerDirectory, MenuItem};
use crate::domain::delivery::Delivery;
use crate::domain::driver::DeliveryDriver;
use crate::domain::order::{OrderEvent, OrderSlot};
use crate::domain::subscription::Subscription;
use crate::event_sourcing::store::{EventStore, OutboxStore};

// ============================================================================
// Record Stores - versioned records with conditional writes
// ============================================================================
//
// Every shared mutable record (subscription balance, driver availability,
// delivery progress) is written with compare-and-set on its version. A
// `false` return means another request won; callers re-read and retry or
// give up. Nothing here reads-then-writes without that check.
//
// ============================================================================

pub mod memory;
pub mod scylla_backend;
pub mod schema;

pub use memory::{MemoryBackend, MemoryCatalog, MemoryRecords, MemorySlots};
pub use scylla_backend::{ScyllaBackend, ScyllaCatalog, ScyllaDocuments, ScyllaSlots};

/// A record persisted as one versioned document.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key.
    fn key(&self) -> Uuid;

    fn record_version(&self) -> i64;

    /// Optional secondary lookup value (owner id, external identity).
    fn lookup(&self) -> Option<String> {
        None
    }
}

impl Record for Subscription {
    fn key(&self) -> Uuid {
        self.id
    }

    fn record_version(&self) -> i64 {
        self.version
    }

    fn lookup(&self) -> Option<String> {
        Some(self.customer_id.to_string())
    }
}

impl Record for DeliveryDriver {
    fn key(&self) -> Uuid {
        self.id
    }

    fn record_version(&self) -> i64 {
        self.version
    }
}

/// Deliveries are keyed by their order so the store enforces one per order.
impl Record for Delivery {
    fn key(&self) -> Uuid {
        self.order_id
    }

    fn record_version(&self) -> i64 {
        self.version
    }
}

impl Record for Customer {
    fn key(&self) -> Uuid {
        self.id
    }

    fn record_version(&self) -> i64 {
        1
    }

    fn lookup(&self) -> Option<String> {
        Some(self.external_uid.clone())
    }
}

impl Record for MenuItem {
    fn key(&self) -> Uuid {
        self.id
    }

    fn record_version(&self) -> i64 {
        1
    }
}

impl Record for Addon {
    fn key(&self) -> Uuid {
        self.id
    }

    fn record_version(&self) -> i64 {
        1
    }
}

// ============================================================================
// Store contracts
// ============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>>;

    async fn for_customer(&self, customer_id: Uuid) -> Result<Vec<Subscription>>;

    /// Insert-if-absent.
    async fn insert(&self, subscription: &Subscription) -> Result<bool>;

    /// Write `next` only if the stored version still equals `expected_version`.
    async fn compare_and_set(&self, expected_version: i64, next: &Subscription) -> Result<bool>;
}

#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<DeliveryDriver>>;

    async fn list(&self) -> Result<Vec<DeliveryDriver>>;

    async fn insert(&self, driver: &DeliveryDriver) -> Result<bool>;

    async fn compare_and_set(&self, expected_version: i64, next: &DeliveryDriver) -> Result<bool>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn by_order(&self, order_id: Uuid) -> Result<Option<Delivery>>;

    /// Insert unless the order already has a delivery. Returns whether this
    /// call created it.
    async fn insert_if_absent(&self, delivery: &Delivery) -> Result<bool>;

    async fn compare_and_set(&self, expected_version: i64, next: &Delivery) -> Result<bool>;
}

/// Duplicate-order guard keyed by [`OrderSlot`].
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Claim the slot for `order_id`. Returns the current holder when the
    /// slot is already taken, `None` when this call claimed it.
    async fn reserve(&self, slot: &OrderSlot, order_id: Uuid) -> Result<Option<Uuid>>;

    /// Free the slot only if `order_id` still holds it.
    async fn release(&self, slot: &OrderSlot, order_id: Uuid) -> Result<bool>;
}

/// Everything the engine reads and writes, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn EventStore<OrderEvent>>,
    pub outbox: Arc<dyn OutboxStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub slots: Arc<dyn SlotStore>,
    pub catalog: Arc<dyn Catalog>,
    pub customers: Arc<dyn CustomerDirectory>,
}
