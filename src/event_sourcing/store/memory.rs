use async_trait::async_trait;
use anyhow::{Result, bail};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event_sourcing::core::{DeadLetter, DomainEvent, EventEnvelope, OutboxMessage};
use super::event_store::{check_sequence, ConcurrencyConflict, EventStore, OutboxStore};

// ============================================================================
// In-Memory Event Store
// ============================================================================
//
// Streams and outbox share one lock so an append is all-or-nothing, the
// same guarantee the Scylla batch gives.
//
// ============================================================================

struct Streams<E> {
    events: HashMap<Uuid, Vec<EventEnvelope<E>>>,
    outbox: BTreeMap<Uuid, OutboxMessage>,
    dead: Vec<DeadLetter>,
}

pub struct InMemoryEventStore<E> {
    inner: Mutex<Streams<E>>,
    #[cfg(test)]
    failing_appends: AtomicUsize,
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Streams {
                events: HashMap::new(),
                outbox: BTreeMap::new(),
                dead: Vec::new(),
            }),
            #[cfg(test)]
            failing_appends: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` appends fail as a store outage.
    #[cfg(test)]
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Put a message straight into the pending outbox.
    #[cfg(test)]
    pub async fn enqueue(&self, message: OutboxMessage) {
        self.inner.lock().await.outbox.insert(message.id, message);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

#[async_trait]
impl<E: DomainEvent + 'static> EventStore<E> for InMemoryEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<i64> {
        let new_version = check_sequence(expected_version, &events)?;

        if self.take_injected_failure() {
            bail!("event store unavailable");
        }

        let mut streams = self.inner.lock().await;

        let actual = streams.events.get(&aggregate_id).map_or(0, |s| s.len() as i64);
        if actual != expected_version {
            return Err(ConcurrencyConflict { aggregate_id, expected: expected_version, actual }.into());
        }

        let event_count = events.len();
        streams.events.entry(aggregate_id).or_default().extend(events);
        for message in outbox {
            streams.outbox.insert(message.id, message);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            new_version = new_version,
            event_count = event_count,
            "Appended events to in-memory store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>> {
        let streams = self.inner.lock().await;
        Ok(streams.events.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64> {
        let streams = self.inner.lock().await;
        Ok(streams.events.get(&aggregate_id).map_or(0, |s| s.len() as i64))
    }
}

#[async_trait]
impl<E: DomainEvent + 'static> OutboxStore for InMemoryEventStore<E> {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let streams = self.inner.lock().await;
        Ok(streams.outbox.values().take(limit).cloned().collect())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.inner.lock().await.outbox.remove(&id);
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<i32> {
        let mut streams = self.inner.lock().await;
        match streams.outbox.get_mut(&id) {
            Some(message) => {
                message.attempts += 1;
                message.last_error = Some(error.to_string());
                Ok(message.attempts)
            }
            None => bail!("Outbox message not found: {}", id),
        }
    }

    async fn dead_letter(&self, message: &OutboxMessage, error: &str) -> Result<()> {
        let mut streams = self.inner.lock().await;
        streams.outbox.remove(&message.id);
        streams.dead.push(DeadLetter {
            message: message.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let streams = self.inner.lock().await;
        Ok(streams.dead.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Noted {
        text: String,
    }

    impl DomainEvent for Noted {
        fn event_type(&self) -> &'static str {
            "Noted"
        }
    }

    fn envelope(id: Uuid, seq: i64) -> EventEnvelope<Noted> {
        EventEnvelope::new(id, seq, Noted { text: format!("#{seq}") }, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        assert!(!store.aggregate_exists(id).await.unwrap());
        store.append_events(id, 0, vec![envelope(id, 1), envelope(id, 2)], vec![]).await.unwrap();

        let events = store.load_events(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_data.text, "#2");
        assert_eq!(store.get_current_version(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        store.append_events(id, 0, vec![envelope(id, 1)], vec![]).await.unwrap();

        let outbox = OutboxMessage::new(id, "Noted", &"x", Uuid::new_v4()).unwrap();
        let err = store.append_events(id, 0, vec![envelope(id, 1)], vec![outbox]).await.unwrap_err();

        assert!(err.downcast_ref::<ConcurrencyConflict>().is_some());
        assert_eq!(store.get_current_version(id).await.unwrap(), 1);
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outbox_lifecycle() {
        let store = InMemoryEventStore::<Noted>::new();
        let id = Uuid::new_v4();
        let first = OutboxMessage::new(id, "A", &1, Uuid::new_v4()).unwrap();
        let second = OutboxMessage::new(id, "B", &2, Uuid::new_v4()).unwrap();
        store
            .append_events(id, 0, vec![envelope(id, 1)], vec![first.clone(), second.clone()])
            .await
            .unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.iter().map(|m| m.kind.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);

        assert_eq!(store.record_failure(first.id, "boom").await.unwrap(), 1);
        assert_eq!(store.record_failure(first.id, "boom").await.unwrap(), 2);
        store.dead_letter(&first, "boom").await.unwrap();
        store.complete(second.id).await.unwrap();

        assert!(store.pending(10).await.unwrap().is_empty());
        let dead = store.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.id, first.id);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        store.fail_next_appends(1);

        assert!(store.append_events(id, 0, vec![envelope(id, 1)], vec![]).await.is_err());
        assert!(store.append_events(id, 0, vec![envelope(id, 1)], vec![]).await.is_ok());
    }
}
