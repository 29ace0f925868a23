//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the orchestrator.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Scheduling and execution mode.
    pub concurrency: ConcurrencyConfig,

    /// Per operation class circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Connection pool configuration.
    pub pool: PoolConfig,

    /// Resource lock configuration.
    pub locks: LockConfig,

    /// Remote document API endpoint.
    pub remote: RemoteConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Which execution path the fallback controller takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Concurrent first, sequential fallback on systemic failure.
    #[default]
    Auto,
    /// Concurrent only.
    Concurrent,
    /// Sequential only.
    Sequential,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ExecutionMode::Auto),
            "concurrent" => Ok(ExecutionMode::Concurrent),
            "sequential" => Ok(ExecutionMode::Sequential),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionMode::Auto => "auto",
            ExecutionMode::Concurrent => "concurrent",
            ExecutionMode::Sequential => "sequential",
        };
        f.write_str(s)
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum work items in flight per batch.
    pub max_concurrency: usize,

    /// Default execution mode.
    pub execution_mode: ExecutionMode,

    /// Kill switch: forces sequential execution regardless of health signals.
    pub force_sequential: bool,

    /// Deadline for dispatching a batch in milliseconds (0 = none).
    pub batch_timeout_ms: u64,

    /// Delay between consecutive item dispatches in milliseconds.
    pub item_stagger_ms: u64,

    /// Mutations grouped into one work item / one remote call.
    pub requests_per_item: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            execution_mode: ExecutionMode::Auto,
            force_sequential: false,
            batch_timeout_ms: 300_000,
            item_stagger_ms: 0,
            requests_per_item: 3,
        }
    }
}

impl ConcurrencyConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms))
    }

    pub fn item_stagger(&self) -> Duration {
        Duration::from_millis(self.item_stagger_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// Time spent open before a probe is allowed, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            cooldown_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Backoff growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `backoff_ms * attempt`.
    #[default]
    Linear,
    /// `backoff_ms * 2^(attempt - 1)`.
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total calls = max_attempts + 1).
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    pub backoff_ms: u64,

    /// Upper bound for a single delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Delay growth.
    pub strategy: BackoffStrategy,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 1000,
            max_backoff_ms: 10_000,
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pooled connections.
    pub size: usize,

    /// Bounded wait for a free connection in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Consecutive transport failures that force a pool reset.
    pub reset_after_transport_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            acquire_timeout_ms: 30_000,
            reset_after_transport_failures: 2,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Resource lock configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// Bounded wait for a per-document lock in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Remote document API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    /// API base URL.
    pub base_url: String,

    /// Deadline for a single remote call in milliseconds.
    pub request_timeout_ms: u64,

    /// Environment variable holding the bearer token.
    pub token_env: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://slides.googleapis.com".to_string(),
            request_timeout_ms: 30_000,
            token_env: "DECK_API_TOKEN".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
