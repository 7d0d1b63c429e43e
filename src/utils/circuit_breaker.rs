use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::metrics::Metrics;
use super::retry::IsTransient;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Sits in front of the stores the outbox relay writes to. When effects keep
// failing for infrastructure reasons the relay stops hammering the cluster
// and waits out the cool-down before probing again.
//
// States:
// - Closed: effects run
// - Open: effects are skipped until the cool-down elapses
// - HalfOpen: probing; enough successes close it, one failure reopens
//
// Only transient failures count. An effect rejected for bad input says
// nothing about downstream health.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    pub fn gauge_value(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before opening.
    pub failure_threshold: u32,
    /// Cool-down before a half-open probe.
    pub timeout: Duration,
    /// Successes needed in half-open to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit {0} is open")]
    CircuitOpen(&'static str),

    #[error("{0}")]
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
            metrics: None,
        }
    }

    /// Report state changes to the metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.update_circuit_breaker_state(CircuitState::Closed.gauge_value());
        self.metrics = Some(metrics);
        self
    }

    /// Whether a call would be let through right now. Moves an expired
    /// Open circuit to HalfOpen.
    pub async fn allows_calls(&self) -> bool {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.config.timeout);
                if cooled {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.success_count = 0;
                }
                cooled
            }
        }
    }

    pub async fn call<Fut, T, E>(&self, operation: Fut) -> Result<T, CircuitBreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: IsTransient,
    {
        if !self.allows_calls().await {
            return Err(CircuitBreakerError::CircuitOpen(self.name));
        }

        match operation.await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(err) => {
                if err.is_transient() {
                    self.record_failure().await;
                }
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                self.transition(&mut state, CircuitState::Open);
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Open);
                state.opened_at = Some(Instant::now());
                state.success_count = 0;
            }
            _ => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;

        tracing::warn!(
            circuit = self.name,
            from = from.as_str(),
            to = to.as_str(),
            failures = state.failure_count,
            "Circuit breaker state change"
        );

        if let Some(metrics) = &self.metrics {
            metrics.update_circuit_breaker_state(to.gauge_value());
            metrics.record_circuit_breaker_transition(from.as_str(), to.as_str());
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, timeout_ms: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                timeout: Duration::from_millis(timeout_ms),
                success_threshold: successes,
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_transient_failures() {
        let cb = breaker(3, 1_000, 2);

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>(anyhow::anyhow!("timeout")) }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(async { Ok::<_, anyhow::Error>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen("test"))));
    }

    #[tokio::test]
    async fn test_permanent_failures_do_not_trip() {
        let cb = breaker(1, 1_000, 1);
        let permanent = || anyhow::Error::from(crate::fulfillment::EngineError::Validation("bad".into()));

        for _ in 0..3 {
            let _ = cb.call(async { Err::<(), _>(permanent()) }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_circuit() {
        let cb = breaker(2, 50, 1).with_metrics(Arc::new(Metrics::new().unwrap()));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("down")) }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.call(async { Ok::<_, anyhow::Error>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let cb = breaker(1, 20, 2);
        let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("down")) }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.allows_calls().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("still down")) }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
