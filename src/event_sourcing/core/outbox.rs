use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

// ============================================================================
// Outbox Message - post-commit work recorded with the events
// ============================================================================

/// A unit of follow-up work written in the same batch as the events that
/// caused it. Ids are UUIDv7 so pending messages sort by creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: String,
    pub payload: String,
    pub correlation_id: Uuid,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new<T: Serialize>(
        aggregate_id: Uuid,
        kind: &str,
        payload: &T,
        correlation_id: Uuid,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_id,
            kind: kind.to_string(),
            payload: serde_json::to_string(payload)?,
            correlation_id,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Dead-lettered message with the error that exhausted its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message: OutboxMessage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_payload_decodes_back() {
        let msg = OutboxMessage::new(Uuid::new_v4(), "Ping", &Ping { seq: 4 }, Uuid::new_v4()).unwrap();
        assert_eq!(msg.attempts, 0);
        assert_eq!(msg.decode::<Ping>().unwrap(), Ping { seq: 4 });
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let a = OutboxMessage::new(Uuid::new_v4(), "Ping", &Ping { seq: 1 }, Uuid::new_v4()).unwrap();
        let b = OutboxMessage::new(Uuid::new_v4(), "Ping", &Ping { seq: 2 }, Uuid::new_v4()).unwrap();
        assert!(a.id < b.id);
    }
}
