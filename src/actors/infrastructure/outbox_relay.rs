use actix::prelude::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::event_sourcing::core::OutboxMessage;
use crate::fulfillment::EffectExecutor;
use crate::utils::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryConfig, RetryResult,
};
use super::{AddToDlq, DlqActor, HealthMonitorActor, UpdateHealth};

// ============================================================================
// Outbox Relay - finishes post-commit effects the inline pass left behind
// ============================================================================
//
// Every tick:
//   1. read the oldest pending outbox messages
//   2. skip ones still inside the grace period (the inline pass may be on them)
//   3. apply each effect with retry + backoff behind a circuit breaker
//   4. complete on success, bump attempts on failure
//   5. park in the DLQ once attempts run out or the failure is permanent
//
// Effects are idempotent, so a message applied twice (inline and relayed)
// converges to the same records.
//
// ============================================================================

const COMPONENT: &str = "outbox_relay";

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Stored attempts after which a message is dead-lettered.
    pub max_attempts: i32,
    pub grace_period: chrono::Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_attempts: 5,
            grace_period: chrono::Duration::seconds(2),
        }
    }
}

/// Outcome counts of one relay pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayReport {
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub deferred: usize,
}

/// One drain of the outbox. Separate from the actor so a pass can run as a
/// plain future.
#[derive(Clone)]
pub(crate) struct RelayPass {
    executor: Arc<EffectExecutor>,
    dlq: Addr<DlqActor>,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    settings: RelaySettings,
}

impl RelayPass {
    pub(crate) fn new(
        executor: Arc<EffectExecutor>,
        dlq: Addr<DlqActor>,
        retry: RetryConfig,
        settings: RelaySettings,
    ) -> Self {
        let breaker = CircuitBreaker::new("outbox_relay", CircuitBreakerConfig::default())
            .with_metrics(executor.metrics().clone());

        Self {
            executor,
            dlq,
            breaker,
            retry,
            settings,
        }
    }

    pub(crate) async fn run(&self) -> anyhow::Result<RelayReport> {
        let outbox = self.executor.outbox();
        let metrics = self.executor.metrics();

        let pending = outbox.pending(self.settings.batch_size).await?;
        metrics.outbox_pending.set(pending.len() as i64);

        let settled_before = Utc::now() - self.settings.grace_period;
        let mut report = RelayReport::default();

        for message in pending {
            if message.created_at > settled_before || !self.breaker.allows_calls().await {
                report.deferred += 1;
                continue;
            }

            let msg = &message;
            let outcome = retry_with_backoff(
                &self.retry,
                move |_attempt| async move {
                    self.breaker
                        .call(self.executor.process(msg, "relay"))
                        .await
                        .map_err(|e| match e {
                            CircuitBreakerError::OperationFailed(err) => err,
                            open @ CircuitBreakerError::CircuitOpen(_) => anyhow::anyhow!("{}", open),
                        })
                },
                |attempt| metrics.record_retry_attempt("outbox_effect", attempt),
            )
            .await;

            match outcome {
                RetryResult::Success(()) => {
                    metrics.record_retry_outcome("outbox_effect", true);
                    if let Err(e) = outbox.complete(message.id).await {
                        tracing::warn!(message_id = %message.id, error = %e, "Effect applied but not marked complete");
                    }
                    report.completed += 1;
                }
                RetryResult::Failed(err) => {
                    metrics.record_retry_outcome("outbox_effect", false);
                    let error = err.to_string();
                    let attempts = outbox.record_failure(message.id, &error).await?;

                    if attempts >= self.settings.max_attempts {
                        let parked = OutboxMessage { attempts, last_error: Some(error.clone()), ..message };
                        if self.park(parked, error).await {
                            report.dead_lettered += 1;
                        } else {
                            report.failed += 1;
                        }
                    } else {
                        tracing::warn!(
                            message_id = %message.id,
                            order_id = %message.aggregate_id,
                            attempts = attempts,
                            error = %error,
                            "⚠️ Effect still failing, will retry on a later pass"
                        );
                        report.failed += 1;
                    }
                }
                RetryResult::PermanentFailure(err) => {
                    metrics.record_retry_outcome("outbox_effect", false);
                    if self.park(message, err.to_string()).await {
                        report.dead_lettered += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        if report != RelayReport::default() {
            tracing::info!(
                completed = report.completed,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                deferred = report.deferred,
                "📮 Outbox relay pass finished"
            );
        }

        Ok(report)
    }

    /// Hand a message to the DLQ. On failure it stays pending.
    async fn park(&self, message: OutboxMessage, error: String) -> bool {
        let message_id = message.id;
        match self.dlq.send(AddToDlq { message, error }).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(message_id = %message_id, error = %e, "DLQ rejected effect");
                false
            }
            Err(e) => {
                tracing::error!(message_id = %message_id, error = %e, "DLQ actor unreachable");
                false
            }
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

pub struct OutboxRelay {
    pass: RelayPass,
    poll_interval: Duration,
    health_monitor: Option<Addr<HealthMonitorActor>>,
    in_flight: bool,
    breaker_state: CircuitState,
    last_report: Option<RelayReport>,
    last_error: Option<String>,
}

impl OutboxRelay {
    pub fn new(
        executor: Arc<EffectExecutor>,
        dlq: Addr<DlqActor>,
        health_monitor: Option<Addr<HealthMonitorActor>>,
        settings: RelaySettings,
    ) -> Self {
        let poll_interval = settings.poll_interval;
        Self {
            pass: RelayPass::new(executor, dlq, RetryConfig::for_effects(), settings),
            poll_interval,
            health_monitor,
            in_flight: false,
            breaker_state: CircuitState::Closed,
            last_report: None,
            last_error: None,
        }
    }

    fn poll(&mut self, ctx: &mut Context<Self>) {
        // A slow pass is never overlapped by the next tick.
        if self.in_flight {
            return;
        }
        self.in_flight = true;

        let pass = self.pass.clone();
        ctx.spawn(
            async move {
                let result = pass.run().await;
                let state = pass.breaker.state().await;
                (result, state)
            }
            .into_actor(self)
            .map(|(result, state), act, _ctx| {
                act.in_flight = false;
                act.breaker_state = state;
                match result {
                    Ok(report) => {
                        act.last_error = None;
                        act.last_report = Some(report);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                        act.last_error = Some(e.to_string());
                    }
                }
                act.report_health();
            }),
        );
    }

    fn report_health(&self) {
        if let Some(monitor) = &self.health_monitor {
            let health = self.check_health();
            monitor.do_send(UpdateHealth {
                component: health.name,
                status: health.status,
                details: health.details,
            });
        }
    }
}

impl HealthCheckable for OutboxRelay {
    fn check_health(&self) -> ComponentHealth {
        let status = if let Some(error) = &self.last_error {
            HealthStatus::Unhealthy(format!("outbox unreadable: {}", error))
        } else if self.breaker_state != CircuitState::Closed {
            HealthStatus::from(self.breaker_state)
        } else {
            match &self.last_report {
                Some(report) if report.failed > 0 => {
                    HealthStatus::Degraded(format!("{} effects failing", report.failed))
                }
                _ => HealthStatus::Healthy,
            }
        };

        let health = ComponentHealth::new(self.component_name(), status);
        match &self.last_report {
            Some(report) => health.with_details(format!(
                "last pass: {} completed, {} dead-lettered, {} deferred",
                report.completed, report.dead_lettered, report.deferred
            )),
            None => health,
        }
    }

    fn component_name(&self) -> &str {
        COMPONENT
    }
}

impl Actor for OutboxRelay {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(interval_ms = self.poll_interval.as_millis() as u64, "📮 OutboxRelay started");
        self.report_health();
        ctx.run_interval(self.poll_interval, |act, ctx| act.poll(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::store::event_store::OutboxStore;
    use crate::domain::catalog::Customer;
    use crate::domain::order::{OrderStatus, OrderSlot};
    use crate::fulfillment::testkit::world;
    use crate::fulfillment::PendingEffect;
    use crate::domain::delivery::DeliveryMilestone;
    use uuid::Uuid;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    fn settled(max_attempts: i32) -> RelaySettings {
        RelaySettings {
            poll_interval: Duration::from_millis(20),
            batch_size: 10,
            max_attempts,
            grace_period: chrono::Duration::zero(),
        }
    }

    fn dlq_for(w: &crate::fulfillment::testkit::World) -> Addr<DlqActor> {
        DlqActor::new(w.backend.events.clone(), w.engine.metrics().clone()).start()
    }

    #[actix::test]
    async fn test_pending_effect_is_applied_and_completed() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();
        let slot = OrderSlot {
            customer_id: order.customer_id,
            meal_type: order.meal_type,
            scheduled_date: order.scheduled_date,
            menu_item_id: order.menu_item.item_id,
        };
        let message = PendingEffect::ReleaseSlot { order_id: order.id, slot }
            .to_message(Uuid::new_v4())
            .unwrap();
        w.backend.events.enqueue(message).await;

        let pass = RelayPass::new(w.engine.effects(), dlq_for(&w), quick_retry(), settled(3));
        let report = pass.run().await.unwrap();

        assert_eq!(report.completed, 1);
        assert!(w.backend.events.pending(10).await.unwrap().is_empty());
    }

    #[actix::test]
    async fn test_fresh_messages_wait_out_the_grace_period() {
        let w = world().await;
        let message = PendingEffect::ProvisionDelivery { order_id: Uuid::new_v4() }
            .to_message(Uuid::new_v4())
            .unwrap();
        w.backend.events.enqueue(message).await;

        let settings = RelaySettings { grace_period: chrono::Duration::minutes(5), ..settled(3) };
        let pass = RelayPass::new(w.engine.effects(), dlq_for(&w), quick_retry(), settings);
        let report = pass.run().await.unwrap();

        assert_eq!(report, RelayReport { deferred: 1, ..RelayReport::default() });
        assert_eq!(w.backend.events.pending(10).await.unwrap()[0].attempts, 0);
    }

    #[actix::test]
    async fn test_transient_failures_dead_letter_after_max_attempts() {
        let w = world().await;
        let message = PendingEffect::MarkDeliveryMilestone {
            order_id: Uuid::new_v4(),
            milestone: DeliveryMilestone::Delivered,
            at: Utc::now(),
            reason: None,
        }
        .to_message(Uuid::new_v4())
        .unwrap();
        w.backend.events.enqueue(message.clone()).await;

        let pass = RelayPass::new(w.engine.effects(), dlq_for(&w), quick_retry(), settled(2));

        let first = pass.run().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(w.backend.events.pending(10).await.unwrap()[0].attempts, 1);

        let second = pass.run().await.unwrap();
        assert_eq!(second.dead_lettered, 1);
        assert!(w.backend.events.pending(10).await.unwrap().is_empty());

        let parked = w.backend.events.dead_letters(10).await.unwrap();
        assert_eq!(parked[0].message.id, message.id);
        assert_eq!(parked[0].message.attempts, 2);
    }

    #[actix::test]
    async fn test_permanent_failure_parks_immediately() {
        let w = world().await;
        let order = w.engine.place_order(w.customer, w.dinner_request(vec![], false)).await.unwrap();

        // No address: provisioning on acceptance cannot succeed.
        let customer = w.backend.customers.get(w.customer.id).await.unwrap();
        w.backend.customers.put(Customer { address: None, ..customer }).await;
        let accepted = w.engine.transition_status(w.staff, order.id, "accepted", None).await.unwrap();
        assert_eq!(accepted.status, OrderStatus::Accepted);
        assert_eq!(w.backend.events.pending(10).await.unwrap().len(), 1);

        let pass = RelayPass::new(w.engine.effects(), dlq_for(&w), quick_retry(), settled(5));
        let report = pass.run().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(w.backend.events.dead_letters(10).await.unwrap().len(), 1);
        assert_eq!(w.engine.metrics().dlq_messages_total.get(), 1);
    }

    #[actix::test]
    async fn test_actor_drains_on_its_interval() {
        let w = world().await;
        let message = PendingEffect::ProvisionDelivery { order_id: Uuid::new_v4() }
            .to_message(Uuid::new_v4())
            .unwrap();
        w.backend.events.enqueue(message).await;

        let relay = OutboxRelay::new(w.engine.effects(), dlq_for(&w), None, settled(1));
        let mut pass = relay.pass.clone();
        pass.retry = quick_retry();
        let relay = OutboxRelay { pass, ..relay }.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(w.backend.events.pending(10).await.unwrap().is_empty());
        assert_eq!(w.backend.events.dead_letters(10).await.unwrap().len(), 1);
        drop(relay);
    }
}
