mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// - Order placement, transitions and rejected commands
// - Voucher consumption / reversal
// - Delivery provisioning and driver assignment
// - Refund decisions
// - Post-commit effects (inline and relayed), retries, DLQ
// - Circuit breaker and actor health
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Orders
    pub orders_placed: IntCounterVec,
    pub order_transitions: IntCounterVec,
    pub commands_rejected: IntCounterVec,

    // Resources
    pub vouchers: IntCounterVec,
    pub deliveries_provisioned: IntCounter,
    pub driver_assignments: IntCounterVec,
    pub refunds: IntCounterVec,

    // Effects
    pub effects_processed: IntCounterVec,
    pub effects_failed: IntCounterVec,
    pub effect_duration: HistogramVec,
    pub outbox_pending: IntGauge,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_effect: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,

    pub actor_health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_placed = IntCounterVec::new(
            Opts::new("orders_placed_total", "Orders placed"),
            &["meal_type", "payment"],
        )?;
        registry.register(Box::new(orders_placed.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order status transitions"),
            &["to_status"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let commands_rejected = IntCounterVec::new(
            Opts::new("order_commands_rejected_total", "Order operations rejected"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(commands_rejected.clone()))?;

        let vouchers = IntCounterVec::new(
            Opts::new("vouchers_total", "Vouchers consumed or reversed"),
            &["direction"],
        )?;
        registry.register(Box::new(vouchers.clone()))?;

        let deliveries_provisioned = IntCounter::new(
            "deliveries_provisioned_total",
            "Delivery records created",
        )?;
        registry.register(Box::new(deliveries_provisioned.clone()))?;

        let driver_assignments = IntCounterVec::new(
            Opts::new("driver_assignments_total", "Drivers assigned to orders"),
            &["mode"],
        )?;
        registry.register(Box::new(driver_assignments.clone()))?;

        let refunds = IntCounterVec::new(
            Opts::new("refunds_total", "Refund requests and decisions"),
            &["outcome"],
        )?;
        registry.register(Box::new(refunds.clone()))?;

        let effects_processed = IntCounterVec::new(
            Opts::new("effects_processed_total", "Post-commit effects completed"),
            &["effect", "stage"],
        )?;
        registry.register(Box::new(effects_processed.clone()))?;

        let effects_failed = IntCounterVec::new(
            Opts::new("effects_failed_total", "Post-commit effect failures"),
            &["effect", "stage"],
        )?;
        registry.register(Box::new(effects_failed.clone()))?;

        let effect_duration = HistogramVec::new(
            HistogramOpts::new("effect_duration_seconds", "Post-commit effect execution time")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["effect"],
        )?;
        registry.register(Box::new(effect_duration.clone()))?;

        let outbox_pending = IntGauge::new(
            "outbox_pending_messages",
            "Pending effects seen by the last relay poll",
        )?;
        registry.register(Box::new(outbox_pending.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Total successful retries"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total effects moved to the dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_effect = IntCounterVec::new(
            Opts::new("dlq_messages_by_effect", "DLQ messages by effect kind"),
            &["effect"],
        )?;
        registry.register(Box::new(dlq_messages_by_effect.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let actor_health_status = IntGauge::new(
            "actor_health_status",
            "Actor health status (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(actor_health_status.clone()))?;

        Ok(Self {
            registry,
            orders_placed,
            order_transitions,
            commands_rejected,
            vouchers,
            deliveries_provisioned,
            driver_assignments,
            refunds,
            effects_processed,
            effects_failed,
            effect_duration,
            outbox_pending,
            retry_attempts_total,
            retry_success,
            retry_failure,
            dlq_messages_total,
            dlq_messages_by_effect,
            circuit_breaker_state,
            circuit_breaker_transitions,
            actor_health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_placed(&self, meal_type: &str, with_voucher: bool) {
        let payment = if with_voucher { "voucher" } else { "cash" };
        self.orders_placed.with_label_values(&[meal_type, payment]).inc();
    }

    pub fn record_transition(&self, to_status: &str) {
        self.order_transitions.with_label_values(&[to_status]).inc();
    }

    pub fn record_rejection(&self, operation: &str, kind: &str) {
        self.commands_rejected.with_label_values(&[operation, kind]).inc();
    }

    pub fn record_vouchers(&self, direction: &str, count: u32) {
        self.vouchers.with_label_values(&[direction]).inc_by(u64::from(count));
    }

    pub fn record_driver_assignment(&self, mode: &str) {
        self.driver_assignments.with_label_values(&[mode]).inc();
    }

    pub fn record_refund(&self, outcome: &str) {
        self.refunds.with_label_values(&[outcome]).inc();
    }

    /// `stage` is "inline" or "relay".
    pub fn record_effect(&self, effect: &str, stage: &str, duration_secs: f64, success: bool) {
        if success {
            self.effects_processed.with_label_values(&[effect, stage]).inc();
        } else {
            self.effects_failed.with_label_values(&[effect, stage]).inc();
        }
        self.effect_duration.with_label_values(&[effect]).observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    pub fn record_retry_outcome(&self, operation: &str, success: bool) {
        if success {
            self.retry_success.with_label_values(&[operation]).inc();
        } else {
            self.retry_failure.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_dlq_message(&self, effect: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_effect.with_label_values(&[effect]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(metrics: &Metrics, name: &str) -> f64 {
        metrics
            .registry
            .gather()
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.metric.iter().map(|s| s.counter.value.unwrap_or(0.0)).sum())
            .unwrap_or(0.0)
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("ACCEPTED");
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_vouchers_by_count() {
        let metrics = Metrics::new().unwrap();
        metrics.record_vouchers("consumed", 1);
        metrics.record_vouchers("consumed", 2);
        assert_eq!(counter(&metrics, "vouchers_total"), 3.0);
    }

    #[test]
    fn test_record_effect_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_effect("ReverseVouchers", "inline", 0.01, false);
        metrics.record_effect("ReverseVouchers", "relay", 0.02, true);

        assert_eq!(counter(&metrics, "effects_failed_total"), 1.0);
        assert_eq!(counter(&metrics, "effects_processed_total"), 1.0);
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("ProvisionDelivery");
        metrics.record_dlq_message("ReleaseDriver");
        assert_eq!(counter(&metrics, "dlq_messages_total"), 2.0);
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_circuit_breaker_transition("Closed", "Open");
        metrics.update_circuit_breaker_state(1);

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
