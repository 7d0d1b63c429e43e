use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::catalog::CustomerDirectory;
use crate::domain::delivery::{estimated_arrival, Delivery, DeliveryError, DeliveryMilestone, Location};
use crate::domain::order::OrderAggregate;
use crate::domain::timing::ServiceClock;
use crate::store::DeliveryStore;
use super::errors::EngineError;

// ============================================================================
// Delivery Provisioner
// ============================================================================
//
// One delivery per order, created when the kitchen accepts it. The store is
// keyed by order id, so two concurrent provision calls create one record.
//
// ============================================================================

const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct DeliveryProvisioner {
    deliveries: Arc<dyn DeliveryStore>,
    customers: Arc<dyn CustomerDirectory>,
    kitchen: Location,
    clock: Arc<dyn ServiceClock>,
}

impl DeliveryProvisioner {
    pub fn new(
        deliveries: Arc<dyn DeliveryStore>,
        customers: Arc<dyn CustomerDirectory>,
        kitchen: Location,
        clock: Arc<dyn ServiceClock>,
    ) -> Self {
        Self {
            deliveries,
            customers,
            kitchen,
            clock,
        }
    }

    pub async fn for_order(&self, order_id: Uuid) -> Result<Option<Delivery>, EngineError> {
        Ok(self.deliveries.by_order(order_id).await?)
    }

    /// Create the delivery for an accepted order, or return the existing one.
    pub async fn provision(&self, order: &OrderAggregate) -> Result<Delivery, EngineError> {
        if let Some(existing) = self.deliveries.by_order(order.id).await? {
            return Ok(existing);
        }

        let customer = self
            .customers
            .customer(order.customer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("customer", order.customer_id))?;

        let drop_off = customer.address.ok_or_else(|| {
            EngineError::Validation(format!("customer {} has no delivery address", order.customer_id))
        })?;

        let eta = estimated_arrival(order.meal_type, order.scheduled_date, self.clock.offset());
        let mut delivery = Delivery::provision(order.id, self.kitchen.clone(), drop_off, eta, self.clock.now_utc());
        delivery.driver_id = order.driver_id;
        delivery.driver_assigned_at = order.driver_assigned_at;

        if self.deliveries.insert_if_absent(&delivery).await? {
            tracing::info!(
                order_id = %order.id,
                delivery_id = %delivery.id,
                eta = %eta,
                "📦 Delivery provisioned"
            );
            return Ok(delivery);
        }

        // Lost the race; the winner's record is authoritative.
        self.deliveries
            .by_order(order.id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(order.id).into())
    }

    pub async fn assign_driver(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Delivery, EngineError> {
        self.update(order_id, |delivery| delivery.assign_driver(driver_id, at)).await
    }

    pub async fn record(
        &self,
        order_id: Uuid,
        milestone: DeliveryMilestone,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<Delivery, EngineError> {
        let delivery = self
            .update(order_id, |delivery| delivery.record(milestone, at, reason.clone()))
            .await?;

        tracing::info!(order_id = %order_id, milestone = %milestone, "Delivery milestone recorded");
        Ok(delivery)
    }

    async fn update<F>(&self, order_id: Uuid, change: F) -> Result<Delivery, EngineError>
    where
        F: Fn(&Delivery) -> Result<Option<Delivery>, DeliveryError>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .deliveries
                .by_order(order_id)
                .await?
                .ok_or(DeliveryError::NotFound(order_id))?;

            let Some(next) = change(&current)? else {
                return Ok(current);
            };

            if self.deliveries.compare_and_set(current.version, &next).await? {
                return Ok(next);
            }
        }

        Err(EngineError::ResourceConflict(format!("delivery for order {order_id} kept changing")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::testkit::world;
    use crate::fulfillment::ErrorKind;

    #[tokio::test]
    async fn test_provision_is_idempotent_per_order() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();
        let accepted = w
            .engine
            .transition_status(w.staff, order.id, "accepted", None)
            .await
            .unwrap();

        let first = w.engine.provisioner.for_order(order.id).await.unwrap().unwrap();
        assert_eq!(first.from.address, "Central Kitchen");
        assert_eq!(first.to.address, "12 Hill Rd");

        let again = w.engine.provisioner.provision(&accepted).await.unwrap();
        assert_eq!(again.id, first.id);
    }

    #[tokio::test]
    async fn test_customer_without_address_cannot_be_provisioned() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();

        let mut customer = w.backend.customers.get(w.customer.id).await.unwrap();
        customer.address = None;
        w.backend.customers.put(customer).await;

        let err = w.engine.provisioner.provision(&order).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(w.engine.provisioner.for_order(order.id).await.unwrap().is_none());
    }
}
