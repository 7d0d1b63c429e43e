use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delivery::Location;
use super::meal::MealType;

// ============================================================================
// External Collaborators - catalog and customer lookups
// ============================================================================
//
// Catalog CRUD and customer management live outside this engine. Only the
// read contracts the engine depends on are declared here.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub name: String,
    pub meal_type: MealType,
    pub price: Decimal,
    pub is_live: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_live: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub external_uid: String,
    pub name: String,
    pub is_active: bool,
    pub address: Option<Location>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Live, non-deleted menu item served for `meal_type`.
    async fn live_menu_item(&self, id: Uuid, meal_type: MealType) -> anyhow::Result<Option<MenuItem>>;

    /// Live, non-deleted addons among `ids`. Missing ids are simply absent.
    async fn live_addons(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Addon>>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn customer(&self, id: Uuid) -> anyhow::Result<Option<Customer>>;

    async fn customer_by_external_identity(&self, uid: &str) -> anyhow::Result<Option<Customer>>;
}
