use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::fulfillment::{EngineError, ErrorKind};

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used by the outbox relay to re-drive effects that failed inline. Errors
// that can never succeed on retry (bad payloads, records that fail
// validation) stop the loop immediately so the message can be parked.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts per relay pass, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Short in-pass backoff for effects; the relay's poll interval provides
    /// the long-range spacing between passes.
    pub fn for_effects() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed with a transient error.
    Failed(E),
    /// Retrying cannot help.
    PermanentFailure(E),
}

/// Whether a failure is worth retrying.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

impl IsTransient for anyhow::Error {
    fn is_transient(&self) -> bool {
        if self.downcast_ref::<serde_json::Error>().is_some() {
            return false;
        }

        match self.downcast_ref::<EngineError>() {
            // A delivery that is not provisioned yet, or a race that was
            // lost, can succeed on a later attempt. Input the records
            // reject cannot.
            Some(err) => !matches!(
                err.kind(),
                ErrorKind::BadRequest | ErrorKind::Forbidden | ErrorKind::Unauthorized
            ),
            None => true,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. `on_retry` sees each attempt number that is about to be retried.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
    R: FnMut(u32),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) if !error.is_transient() => {
                tracing::warn!(attempt = attempt, error = %error, "Permanent failure, not retrying");
                return RetryResult::PermanentFailure(error);
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    tracing::warn!(attempt = attempt, error = %error, "Operation failed after all retries");
                    return RetryResult::Failed(error);
                }

                let delay = config.delay_after(attempt);
                tracing::debug!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                on_retry(attempt);
                sleep(delay).await;
            }
        }
    }
}
