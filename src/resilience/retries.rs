//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth another attempt
//! - Re-run the operation with backoff between attempts
//! - Report how many calls were made
//!
//! # Design Decisions
//! - `max_attempts` counts retries after the first call
//! - Only transient and pool-exhausted failures are retried; an open breaker,
//!   a lock timeout, a fatal rejection or a systemic fault surface immediately
//! - Backoff never holds a pooled connection: the operation acquires per attempt

use std::future::Future;
use crate::config::RetryConfig;
use crate::error::{ErrorKind, OrchestratorError, OrchestratorResult};
use crate::observability::metrics;
use super::backoff::Backoff;

/// How a failure should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Classify an error for retry purposes.
pub fn classify(error: &OrchestratorError) -> RetryDecision {
    match error.kind() {
        ErrorKind::Transient | ErrorKind::PoolExhausted => RetryDecision::Retry,
        ErrorKind::Fatal
        | ErrorKind::CircuitOpen
        | ErrorKind::LockTimeout
        | ErrorKind::SystemicFailure
        | ErrorKind::Cancelled => RetryDecision::Abort,
    }
}

/// Result of a retried operation along with the number of calls made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: OrchestratorResult<T>,
    pub attempts: u32,
}

/// Bounded retry with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Backoff::from_config(config))
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(0, Backoff::none())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry limit is reached. `op` is called at most `max_attempts + 1` times.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => {
                    return RetryOutcome { result: Ok(value), attempts };
                }
                Err(error) => error,
            };

            let retries_done = attempts - 1;
            if classify(&error) == RetryDecision::Abort || retries_done >= self.max_attempts {
                if retries_done > 0 {
                    tracing::warn!(attempts, error = %error, "Giving up after retries");
                }
                return RetryOutcome { result: Err(error), attempts };
            }

            let delay = self.backoff.delay(attempts);
            tracing::debug!(
                attempt = attempts,
                max_retries = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            metrics::record_retry(error.kind().as_str());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
