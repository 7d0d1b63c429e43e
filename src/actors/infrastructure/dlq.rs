use actix::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::event_sourcing::core::{DeadLetter, OutboxMessage};
use crate::event_sourcing::store::OutboxStore;
use crate::fulfillment::PendingEffect;
use crate::metrics::Metrics;

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Parks post-commit effects that the relay gave up on:
// - moves the message out of the pending outbox
// - counts it per effect kind
// - answers queries for manual intervention
//
// ============================================================================

pub struct DlqActor {
    outbox: Arc<dyn OutboxStore>,
    metrics: Arc<Metrics>,
}

impl DlqActor {
    pub fn new(outbox: Arc<dyn OutboxStore>, metrics: Arc<Metrics>) -> Self {
        Self { outbox, metrics }
    }
}

impl Actor for DlqActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("DlqActor started - Dead Letter Queue ready");
    }
}

/// Effect name for a parked message, or its raw kind if the payload no
/// longer decodes.
fn effect_label(message: &OutboxMessage) -> String {
    PendingEffect::from_message(message)
        .map(|effect| effect.name().to_string())
        .unwrap_or_else(|_| message.kind.clone())
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), String>")]
pub struct AddToDlq {
    pub message: OutboxMessage,
    pub error: String,
}

#[derive(Message)]
#[rtype(result = "Result<Vec<DeadLetter>, String>")]
pub struct GetDlqMessages {
    pub limit: usize,
}

#[derive(Message)]
#[rtype(result = "Result<DlqStats, String>")]
pub struct GetDlqStats;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStats {
    pub total_messages: usize,
    pub by_effect: HashMap<String, usize>,
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<AddToDlq> for DlqActor {
    type Result = ResponseFuture<Result<(), String>>;

    fn handle(&mut self, msg: AddToDlq, _: &mut Self::Context) -> Self::Result {
        let outbox = self.outbox.clone();
        let metrics = self.metrics.clone();
        let effect = effect_label(&msg.message);

        tracing::error!(
            message_id = %msg.message.id,
            order_id = %msg.message.aggregate_id,
            correlation_id = %msg.message.correlation_id,
            effect = %effect,
            attempts = msg.message.attempts,
            error = %msg.error,
            "💀 Adding effect to Dead Letter Queue"
        );

        Box::pin(async move {
            outbox
                .dead_letter(&msg.message, &msg.error)
                .await
                .map_err(|e| format!("Failed to park effect in DLQ: {}", e))?;

            metrics.record_dlq_message(&effect);
            tracing::info!(message_id = %msg.message.id, "Effect stored in DLQ");

            Ok(())
        })
    }
}

impl Handler<GetDlqMessages> for DlqActor {
    type Result = ResponseFuture<Result<Vec<DeadLetter>, String>>;

    fn handle(&mut self, msg: GetDlqMessages, _: &mut Self::Context) -> Self::Result {
        let outbox = self.outbox.clone();

        Box::pin(async move {
            outbox
                .dead_letters(msg.limit)
                .await
                .map_err(|e| format!("Failed to read DLQ: {}", e))
        })
    }
}

impl Handler<GetDlqStats> for DlqActor {
    type Result = ResponseFuture<Result<DlqStats, String>>;

    fn handle(&mut self, _: GetDlqStats, _: &mut Self::Context) -> Self::Result {
        let outbox = self.outbox.clone();

        Box::pin(async move {
            let parked = outbox
                .dead_letters(usize::MAX)
                .await
                .map_err(|e| format!("Failed to read DLQ: {}", e))?;

            let mut stats = DlqStats {
                total_messages: parked.len(),
                ..DlqStats::default()
            };
            for letter in &parked {
                *stats.by_effect.entry(effect_label(&letter.message)).or_insert(0) += 1;
            }

            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderEvent;
    use crate::event_sourcing::store::InMemoryEventStore;
    use uuid::Uuid;

    #[actix::test]
    async fn test_parked_effect_leaves_pending_and_is_counted() {
        let store = Arc::new(InMemoryEventStore::<OrderEvent>::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let dlq = DlqActor::new(store.clone(), metrics.clone()).start();

        let order_id = Uuid::new_v4();
        let message = PendingEffect::ProvisionDelivery { order_id }
            .to_message(Uuid::new_v4())
            .unwrap();
        store.enqueue(message.clone()).await;

        dlq.send(AddToDlq { message: message.clone(), error: "customer has no address".into() })
            .await
            .unwrap()
            .unwrap();

        assert!(store.pending(10).await.unwrap().is_empty());

        let parked = dlq.send(GetDlqMessages { limit: 10 }).await.unwrap().unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].message.id, message.id);
        assert_eq!(parked[0].error, "customer has no address");

        let stats = dlq.send(GetDlqStats).await.unwrap().unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.by_effect.get("provision_delivery"), Some(&1));
        assert_eq!(metrics.dlq_messages_total.get(), 1);
    }
}
