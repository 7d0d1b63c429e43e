use async_trait::async_trait;
use anyhow::{Result, bail};
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, DeadLetter, DomainEvent, EventEnvelope, OutboxMessage};

// ============================================================================
// Event Store - Repository for Events
// ============================================================================
//
// Responsibilities:
// 1. Append events (append-only) under optimistic concurrency
// 2. Load event history for aggregates
// 3. Record outbox messages in the same atomic write as the events
//
// ============================================================================

/// Raised when the stream moved past the expected version between load and
/// append. Callers downcast it out of `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
pub struct ConcurrencyConflict {
    pub aggregate_id: Uuid,
    pub expected: i64,
    pub actual: i64,
}

#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Append events and outbox messages atomically.
    /// Returns the new version number after appending.
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<i64>;

    /// All events for an aggregate in sequence order.
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>>;

    /// 0 for a stream that does not exist.
    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64>;

    async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool> {
        Ok(self.get_current_version(aggregate_id).await? > 0)
    }
}

/// Pending post-commit work written by `append_events`.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending messages first.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Bump the attempt counter; returns the new count.
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<i32>;

    /// Move a message out of the pending set for manual inspection.
    async fn dead_letter(&self, message: &OutboxMessage, error: &str) -> Result<()>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// Load an aggregate, or `None` when the stream is empty.
pub async fn load_aggregate<A, E>(store: &dyn EventStore<E>, aggregate_id: Uuid) -> Result<Option<A>>
where
    E: DomainEvent,
    A: Aggregate<Event = E>,
    <A as Aggregate>::Error: std::fmt::Display,
{
    let events = store.load_events(aggregate_id).await?;

    if events.is_empty() {
        return Ok(None);
    }

    A::load_from_events(events).map(Some)
}

/// Sequence numbers must continue the stream without gaps.
pub(crate) fn check_sequence<E>(expected_version: i64, events: &[EventEnvelope<E>]) -> Result<i64> {
    if events.is_empty() {
        bail!("Cannot append empty event list");
    }

    let mut next = expected_version;
    for envelope in events {
        next += 1;
        if envelope.sequence_number != next {
            bail!(
                "Event {} carries sequence {} but the stream expects {}",
                envelope.event_id,
                envelope.sequence_number,
                next
            );
        }
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Tick;

    impl DomainEvent for Tick {
        fn event_type(&self) -> &'static str {
            "Tick"
        }
    }

    #[test]
    fn test_check_sequence_continues_stream() {
        let id = Uuid::new_v4();
        let events = vec![
            EventEnvelope::new(id, 4, Tick, Uuid::new_v4()),
            EventEnvelope::new(id, 5, Tick, Uuid::new_v4()),
        ];
        assert_eq!(check_sequence(3, &events).unwrap(), 5);
    }

    #[test]
    fn test_check_sequence_rejects_gaps_and_empty() {
        let id = Uuid::new_v4();
        let gap = vec![EventEnvelope::new(id, 3, Tick, Uuid::new_v4())];
        assert!(check_sequence(0, &gap).is_err());
        assert!(check_sequence::<Tick>(0, &[]).is_err());
    }

    #[test]
    fn test_conflict_survives_anyhow_round_trip() {
        let conflict = ConcurrencyConflict { aggregate_id: Uuid::new_v4(), expected: 2, actual: 3 };
        let err: anyhow::Error = conflict.clone().into();
        assert_eq!(err.downcast_ref::<ConcurrencyConflict>(), Some(&conflict));
    }
}
