use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::driver::{rotation_order, DeliveryDriver, DriverError};
use crate::store::DriverStore;
use super::errors::EngineError;

// ============================================================================
// Driver Availability Registry
// ============================================================================

const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct DriverRegistry {
    store: Arc<dyn DriverStore>,
}

impl DriverRegistry {
    pub fn new(store: Arc<dyn DriverStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, driver_id: Uuid) -> Result<DeliveryDriver, EngineError> {
        self.store
            .get(driver_id)
            .await?
            .ok_or_else(|| DriverError::NotFound(driver_id).into())
    }

    /// Active, available drivers in round-robin order.
    pub async fn available(&self) -> Result<Vec<DeliveryDriver>, EngineError> {
        let mut drivers: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(DeliveryDriver::is_available)
            .collect();
        drivers.sort_by(rotation_order);
        Ok(drivers)
    }

    /// AVAILABLE → BUSY, only if the driver is still available at write time.
    pub async fn claim(&self, driver_id: Uuid, order_id: Uuid) -> Result<DeliveryDriver, EngineError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(driver_id).await?;
            let next = current.claim(order_id)?;

            if self.store.compare_and_set(current.version, &next).await? {
                tracing::info!(driver_id = %driver_id, order_id = %order_id, "🛵 Driver claimed");
                return Ok(next);
            }
        }

        Err(EngineError::ResourceConflict(format!("driver {driver_id} kept changing, retry the request")))
    }

    /// Claim the first driver in rotation order, moving on to the next
    /// candidate whenever another request wins the race.
    pub async fn claim_next_available(&self, order_id: Uuid) -> Result<DeliveryDriver, EngineError> {
        for candidate in self.available().await? {
            match self.claim(candidate.id, order_id).await {
                Ok(driver) => return Ok(driver),
                Err(EngineError::StateConflict(_)) | Err(EngineError::ResourceConflict(_)) => {
                    tracing::debug!(driver_id = %candidate.id, "Candidate taken, trying next driver");
                }
                Err(other) => return Err(other),
            }
        }

        Err(DriverError::NoneAvailable.into())
    }

    /// BUSY → AVAILABLE if still bound to `order_id`. `completed_at` stamps
    /// the rotation key; compensating releases pass `None`.
    pub async fn release(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, EngineError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(driver_id).await?;
            let Some(next) = current.release(order_id, completed_at) else {
                return Ok(false);
            };

            if self.store.compare_and_set(current.version, &next).await? {
                tracing::info!(driver_id = %driver_id, order_id = %order_id, "Driver released");
                return Ok(true);
            }
        }

        Err(EngineError::ResourceConflict(format!("driver {driver_id} kept changing during release")))
    }

    pub async fn set_online(&self, driver_id: Uuid, online: bool) -> Result<DeliveryDriver, EngineError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(driver_id).await?;
            let next = current.set_online(online)?;
            if next == current {
                return Ok(current);
            }

            if self.store.compare_and_set(current.version, &next).await? {
                tracing::info!(driver_id = %driver_id, online = online, "Driver availability changed");
                return Ok(next);
            }
        }

        Err(EngineError::ResourceConflict(format!("driver {driver_id} kept changing, retry the request")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecords;

    async fn registry_with(drivers: &[DeliveryDriver]) -> DriverRegistry {
        let store = Arc::new(MemoryRecords::<DeliveryDriver>::default());
        for d in drivers {
            store.put(d.clone()).await;
        }
        DriverRegistry::new(store)
    }

    #[tokio::test]
    async fn test_concurrent_claims_bind_one_order() {
        let driver = DeliveryDriver::new(Uuid::new_v4(), "Sam");
        let registry = registry_with(&[driver.clone()]).await;

        let (a, b) = tokio::join!(
            registry.claim(driver.id, Uuid::new_v4()),
            registry.claim(driver.id, Uuid::new_v4()),
        );

        assert!(a.is_ok() ^ b.is_ok());
        let stored = registry.get(driver.id).await.unwrap();
        assert!(stored.current_order().is_some());
    }

    #[tokio::test]
    async fn test_auto_claim_falls_through_to_next_candidate() {
        let now = Utc::now();
        let mut veteran = DeliveryDriver::new(Uuid::new_v4(), "veteran");
        veteran.last_delivery_at = Some(now);
        let rookie = DeliveryDriver::new(Uuid::new_v4(), "rookie");
        let registry = registry_with(&[veteran.clone(), rookie.clone()]).await;

        let first = registry.claim_next_available(Uuid::new_v4()).await.unwrap();
        assert_eq!(first.id, rookie.id);

        let second = registry.claim_next_available(Uuid::new_v4()).await.unwrap();
        assert_eq!(second.id, veteran.id);

        let none = registry.claim_next_available(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(none, EngineError::NotFound { entity: "driver", .. }));
    }

    #[tokio::test]
    async fn test_release_requires_binding() {
        let driver = DeliveryDriver::new(Uuid::new_v4(), "Lee");
        let registry = registry_with(&[driver.clone()]).await;
        let order = Uuid::new_v4();
        registry.claim(driver.id, order).await.unwrap();

        assert!(!registry.release(driver.id, Uuid::new_v4(), Some(Utc::now())).await.unwrap());
        assert!(registry.release(driver.id, order, Some(Utc::now())).await.unwrap());
        assert!(!registry.release(driver.id, order, Some(Utc::now())).await.unwrap());

        let stored = registry.get(driver.id).await.unwrap();
        assert!(stored.is_available());
        assert!(stored.last_delivery_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_driver_is_skipped() {
        let driver = DeliveryDriver::new(Uuid::new_v4(), "Ola");
        let registry = registry_with(&[driver.clone()]).await;

        registry.set_online(driver.id, false).await.unwrap();
        assert!(registry.available().await.unwrap().is_empty());

        registry.set_online(driver.id, true).await.unwrap();
        assert_eq!(registry.available().await.unwrap().len(), 1);
    }
}
