//! Backoff delays between retry attempts.

use std::time::Duration;
use rand::Rng;
use crate::config::{BackoffStrategy, RetryConfig};

/// Delay policy used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub strategy: BackoffStrategy,
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            base_ms: config.backoff_ms,
            max_ms: config.max_backoff_ms.max(config.backoff_ms),
            jitter: config.jitter,
        }
    }

    /// Linear backoff without jitter.
    pub fn linear(base_ms: u64, max_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base_ms,
            max_ms,
            jitter: false,
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::linear(0, 0)
    }

    /// Delay before retry number `attempt` (1 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay_ms = match self.strategy {
            BackoffStrategy::Linear => linear_delay_ms(attempt, self.base_ms, self.max_ms),
            BackoffStrategy::Exponential => exponential_delay_ms(attempt, self.base_ms, self.max_ms),
        };
        if self.jitter {
            Duration::from_millis(delay_ms + jitter_ms(delay_ms))
        } else {
            Duration::from_millis(delay_ms)
        }
    }
}

fn linear_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    base_ms.saturating_mul(attempt as u64).min(max_ms)
}

fn exponential_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    base_ms.saturating_mul(exponential_base).min(max_ms)
}

// 0 to 10% of the delay.
fn jitter_ms(delay_ms: u64) -> u64 {
    let jitter_range = delay_ms / 10;
    if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    }
}
