use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::statement::batch::Batch;
use scylla::value::{CqlTimestamp, CqlValue, Row};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{
    deserialize_event, serialize_event, DeadLetter, DomainEvent, EventEnvelope, OutboxMessage,
};
use super::event_store::{check_sequence, ConcurrencyConflict, EventStore, OutboxStore};

// ============================================================================
// Scylla Event Store
// ============================================================================
//
// 1. Claim the next stream version with a lightweight transaction on
//    aggregate_sequence (IF NOT EXISTS / IF current_sequence = ?)
// 2. Write events + outbox messages in one logged batch
// 3. If the batch fails, hand the claimed version back
//
// ============================================================================

/// All pending outbox rows live in one partition so the relay can page
/// through them in id (creation) order.
const OUTBOX_BUCKET: i32 = 0;

type BatchRow = Vec<Option<CqlValue>>;

pub struct ScyllaEventStore<E: DomainEvent> {
    session: Arc<Session>,
    aggregate_type_name: String,
    _phantom: PhantomData<E>,
}

impl<E: DomainEvent> ScyllaEventStore<E> {
    pub fn new(session: Arc<Session>, aggregate_type_name: &str) -> Self {
        Self {
            session,
            aggregate_type_name: aggregate_type_name.to_string(),
            _phantom: PhantomData,
        }
    }

    async fn claim_version(&self, aggregate_id: Uuid, expected: i64, next: i64) -> Result<bool> {
        let now = Utc::now();
        let result = if expected == 0 {
            self.session
                .query_unpaged(
                    "INSERT INTO aggregate_sequence (aggregate_id, current_sequence, updated_at)
                     VALUES (?, ?, ?) IF NOT EXISTS",
                    (aggregate_id, next, now),
                )
                .await?
        } else {
            self.session
                .query_unpaged(
                    "UPDATE aggregate_sequence SET current_sequence = ?, updated_at = ?
                     WHERE aggregate_id = ? IF current_sequence = ?",
                    (next, now, aggregate_id, expected),
                )
                .await?
        };

        lwt_applied(result)
    }

    async fn return_version(&self, aggregate_id: Uuid, expected: i64, claimed: i64) -> Result<bool> {
        let result = if expected == 0 {
            self.session
                .query_unpaged(
                    "DELETE FROM aggregate_sequence WHERE aggregate_id = ? IF current_sequence = ?",
                    (aggregate_id, claimed),
                )
                .await?
        } else {
            self.session
                .query_unpaged(
                    "UPDATE aggregate_sequence SET current_sequence = ?, updated_at = ?
                     WHERE aggregate_id = ? IF current_sequence = ?",
                    (expected, Utc::now(), aggregate_id, claimed),
                )
                .await?
        };

        lwt_applied(result)
    }

    fn event_row(envelope: &EventEnvelope<E>) -> Result<BatchRow> {
        Ok(vec![
            Some(CqlValue::Uuid(envelope.aggregate_id)),
            Some(CqlValue::BigInt(envelope.sequence_number)),
            Some(CqlValue::Uuid(envelope.event_id)),
            Some(CqlValue::Text(envelope.event_type.clone())),
            Some(CqlValue::Int(envelope.event_version)),
            Some(CqlValue::Text(serialize_event(&envelope.event_data)?)),
            envelope.causation_id.map(CqlValue::Uuid),
            Some(CqlValue::Uuid(envelope.correlation_id)),
            envelope.user_id.map(CqlValue::Uuid),
            Some(timestamp(envelope.timestamp)),
        ])
    }

    fn outbox_row(&self, message: &OutboxMessage) -> BatchRow {
        vec![
            Some(CqlValue::Int(OUTBOX_BUCKET)),
            Some(CqlValue::Uuid(message.id)),
            Some(CqlValue::Uuid(message.aggregate_id)),
            Some(CqlValue::Text(self.aggregate_type_name.clone())),
            Some(CqlValue::Text(message.kind.clone())),
            Some(CqlValue::Text(message.payload.clone())),
            Some(CqlValue::Uuid(message.correlation_id)),
            Some(CqlValue::Int(message.attempts)),
            Some(timestamp(message.created_at)),
        ]
    }
}

#[async_trait]
impl<E: DomainEvent + 'static> EventStore<E> for ScyllaEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<i64> {
        let new_version = check_sequence(expected_version, &events)?;

        if !self.claim_version(aggregate_id, expected_version, new_version).await? {
            let actual = self.get_current_version(aggregate_id).await?;
            return Err(ConcurrencyConflict { aggregate_id, expected: expected_version, actual }.into());
        }

        let mut batch = Batch::default();
        let mut values: Vec<BatchRow> = Vec::with_capacity(events.len() + outbox.len());

        for envelope in &events {
            batch.append_statement(
                "INSERT INTO event_store (
                    aggregate_id, sequence_number, event_id, event_type, event_version,
                    event_data, causation_id, correlation_id, user_id, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            );
            values.push(Self::event_row(envelope)?);
        }

        for message in &outbox {
            batch.append_statement(
                "INSERT INTO outbox_messages (
                    bucket, id, aggregate_id, aggregate_type, kind, payload,
                    correlation_id, attempts, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            );
            values.push(self.outbox_row(message));
        }

        if let Err(err) = self.session.batch(&batch, values).await {
            match self.return_version(aggregate_id, expected_version, new_version).await {
                Ok(true) => {}
                Ok(false) | Err(_) => tracing::error!(
                    aggregate_id = %aggregate_id,
                    claimed_version = new_version,
                    "❌ Event batch failed and the claimed version could not be returned"
                ),
            }
            return Err(err.into());
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %self.aggregate_type_name,
            new_version = new_version,
            event_count = events.len(),
            outbox_count = outbox.len(),
            "✅ Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>> {
        let result = self.session
            .query_unpaged(
                "SELECT aggregate_id, sequence_number, event_id, event_type, event_version,
                        event_data, causation_id, correlation_id, user_id, timestamp
                 FROM event_store
                 WHERE aggregate_id = ?
                 ORDER BY sequence_number ASC",
                (aggregate_id,),
            )
            .await?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events),
        };

        type EventRow = (Uuid, i64, Uuid, String, i32, String, Option<Uuid>, Uuid, Option<Uuid>, DateTime<Utc>);

        for row in rows_result.rows::<EventRow>()? {
            let (agg_id, sequence_number, event_id, event_type, event_version, event_json, causation_id, correlation_id, user_id, timestamp) = row?;

            events.push(EventEnvelope {
                event_id,
                aggregate_id: agg_id,
                sequence_number,
                event_type,
                event_version,
                event_data: deserialize_event(&event_json)?,
                causation_id,
                correlation_id,
                user_id,
                timestamp,
                metadata: HashMap::new(),
            });
        }

        tracing::debug!(aggregate_id = %aggregate_id, count = events.len(), "Loaded events");
        Ok(events)
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64> {
        let result = self.session
            .query_unpaged(
                "SELECT current_sequence FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0),
        };

        Ok(rows_result.maybe_first_row::<(i64,)>()?.map_or(0, |(version,)| version))
    }
}

// ============================================================================
// Outbox
// ============================================================================

type OutboxRow = (Uuid, Uuid, String, String, Uuid, i32, Option<String>, DateTime<Utc>);

fn outbox_message(row: OutboxRow) -> OutboxMessage {
    let (id, aggregate_id, kind, payload, correlation_id, attempts, last_error, created_at) = row;
    OutboxMessage { id, aggregate_id, kind, payload, correlation_id, attempts, last_error, created_at }
}

#[async_trait]
impl<E: DomainEvent + 'static> OutboxStore for ScyllaEventStore<E> {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let result = self.session
            .query_unpaged(
                "SELECT id, aggregate_id, kind, payload, correlation_id, attempts, last_error, created_at
                 FROM outbox_messages WHERE bucket = ? LIMIT ?",
                (OUTBOX_BUCKET, limit as i32),
            )
            .await?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        rows_result
            .rows::<OutboxRow>()?
            .map(|row| Ok(outbox_message(row?)))
            .collect()
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.session
            .query_unpaged(
                "DELETE FROM outbox_messages WHERE bucket = ? AND id = ?",
                (OUTBOX_BUCKET, id),
            )
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<i32> {
        let result = self.session
            .query_unpaged(
                "SELECT attempts FROM outbox_messages WHERE bucket = ? AND id = ?",
                (OUTBOX_BUCKET, id),
            )
            .await?;

        let attempts = result
            .into_rows_result()?
            .maybe_first_row::<(i32,)>()?
            .map_or(0, |(attempts,)| attempts)
            + 1;

        self.session
            .query_unpaged(
                "UPDATE outbox_messages SET attempts = ?, last_error = ? WHERE bucket = ? AND id = ?",
                (attempts, error, OUTBOX_BUCKET, id),
            )
            .await?;

        Ok(attempts)
    }

    async fn dead_letter(&self, message: &OutboxMessage, error: &str) -> Result<()> {
        let mut batch = Batch::default();
        batch.append_statement(
            "INSERT INTO outbox_dead_letters (
                bucket, id, aggregate_id, kind, payload, correlation_id,
                attempts, error, created_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        batch.append_statement("DELETE FROM outbox_messages WHERE bucket = ? AND id = ?");

        let values: Vec<BatchRow> = vec![
            vec![
                Some(CqlValue::Int(OUTBOX_BUCKET)),
                Some(CqlValue::Uuid(message.id)),
                Some(CqlValue::Uuid(message.aggregate_id)),
                Some(CqlValue::Text(message.kind.clone())),
                Some(CqlValue::Text(message.payload.clone())),
                Some(CqlValue::Uuid(message.correlation_id)),
                Some(CqlValue::Int(message.attempts)),
                Some(CqlValue::Text(error.to_string())),
                Some(timestamp(message.created_at)),
                Some(timestamp(Utc::now())),
            ],
            vec![Some(CqlValue::Int(OUTBOX_BUCKET)), Some(CqlValue::Uuid(message.id))],
        ];

        self.session.batch(&batch, values).await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let result = self.session
            .query_unpaged(
                "SELECT id, aggregate_id, kind, payload, correlation_id, attempts, error, created_at, failed_at
                 FROM outbox_dead_letters WHERE bucket = ? LIMIT ?",
                (OUTBOX_BUCKET, limit as i32),
            )
            .await?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        type DeadRow = (Uuid, Uuid, String, String, Uuid, i32, String, DateTime<Utc>, DateTime<Utc>);

        rows_result
            .rows::<DeadRow>()?
            .map(|row| {
                let (id, aggregate_id, kind, payload, correlation_id, attempts, error, created_at, failed_at) = row?;
                Ok(DeadLetter {
                    message: OutboxMessage {
                        id,
                        aggregate_id,
                        kind,
                        payload,
                        correlation_id,
                        attempts,
                        last_error: Some(error.clone()),
                        created_at,
                    },
                    error,
                    failed_at,
                })
            })
            .collect()
    }
}

// ============================================================================
// CQL helpers
// ============================================================================

/// Reads the `[applied]` column of a lightweight transaction result.
pub(crate) fn lwt_applied(result: QueryResult) -> Result<bool> {
    let rows = result.into_rows_result()?;
    let first = rows.maybe_first_row::<Row>()?;

    Ok(matches!(
        first.and_then(|row| row.columns.into_iter().next().flatten()),
        Some(CqlValue::Boolean(true))
    ))
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> CqlValue {
    CqlValue::Timestamp(CqlTimestamp(at.timestamp_millis()))
}
