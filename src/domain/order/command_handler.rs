use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, EventEnvelope, OutboxMessage};
use crate::event_sourcing::store::{load_aggregate, ConcurrencyConflict, EventStore};

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::OrderEvent;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events (+ outbox) → Event Store
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Rejected(#[from] OrderError),

    #[error(transparent)]
    Conflict(ConcurrencyConflict),

    #[error("Event store failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for CommandError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ConcurrencyConflict>() {
            Ok(conflict) => CommandError::Conflict(conflict),
            Err(other) => CommandError::Store(other),
        }
    }
}

/// Result of a committed command: the new state, the stored events and the
/// outbox messages written with them.
#[derive(Debug, Clone)]
pub struct Committed {
    pub order: OrderAggregate,
    pub events: Vec<EventEnvelope<OrderEvent>>,
    pub outbox: Vec<OutboxMessage>,
}

pub struct OrderCommandHandler {
    event_store: Arc<dyn EventStore<OrderEvent>>,
}

impl OrderCommandHandler {
    pub fn new(event_store: Arc<dyn EventStore<OrderEvent>>) -> Self {
        Self { event_store }
    }

    pub async fn load(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, CommandError> {
        Ok(load_aggregate::<OrderAggregate, _>(self.event_store.as_ref(), order_id).await?)
    }

    /// Start a new order stream. Fails with a conflict if the id is taken.
    pub async fn place(&self, command: OrderCommand, correlation_id: Uuid) -> Result<Committed, CommandError> {
        let events = OrderAggregate::decide_placement(&command)?;

        let first = events.first().ok_or(OrderError::NotInitialized)?;
        let mut order = OrderAggregate::apply_first_event(first)?;
        for event in events.iter().skip(1) {
            order.apply_event(event)?;
        }

        self.commit(order, 0, events, &command, correlation_id, Vec::new()).await
    }

    /// Run a command against an existing order. `plan` sees the state before
    /// and after the new events and returns the follow-up work to record in
    /// the same write.
    pub async fn execute<F>(
        &self,
        order_id: Uuid,
        command: OrderCommand,
        correlation_id: Uuid,
        plan: F,
    ) -> Result<Committed, CommandError>
    where
        F: FnOnce(&OrderAggregate, &OrderAggregate) -> anyhow::Result<Vec<OutboxMessage>>,
    {
        let before = self.load(order_id).await?.ok_or(CommandError::NotFound(order_id))?;
        let expected_version = before.version();

        let events = before.handle_command(&command)?;

        let mut after = before.clone();
        for event in &events {
            after.apply_event(event)?;
        }

        let outbox = plan(&before, &after).map_err(CommandError::Store)?;

        self.commit(after, expected_version, events, &command, correlation_id, outbox).await
    }

    async fn commit(
        &self,
        mut order: OrderAggregate,
        expected_version: i64,
        events: Vec<OrderEvent>,
        command: &OrderCommand,
        correlation_id: Uuid,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Committed, CommandError> {
        let aggregate_id = order.id;

        let envelopes: Vec<EventEnvelope<OrderEvent>> = events
            .into_iter()
            .zip(expected_version + 1..)
            .map(|(event, seq)| {
                EventEnvelope::new(aggregate_id, seq, event, correlation_id)
                    .with_user(command.issued_by.id)
                    .with_metadata("role", command.issued_by.role.as_str())
            })
            .collect();

        let new_version = self
            .event_store
            .append_events(aggregate_id, expected_version, envelopes.clone(), outbox.clone())
            .await?;

        order.set_version(new_version);

        Ok(Committed {
            order,
            events: envelopes,
            outbox,
        })
    }
}
