//! Shared orchestration state.
//!
//! Built once per process (or per test) and passed around behind an `Arc`.
//! Pool, lock table and breakers live for the lifetime of the context; the
//! concurrency settings can be swapped at runtime.

use std::sync::Arc;
use arc_swap::ArcSwap;

use crate::config::{validate_config, ConcurrencyConfig, ExecutionMode, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::ResourceLockTable;
use crate::observability::metrics;
use crate::pool::ConnectionManager;
use crate::remote::{ConnectionFactory, HttpConnectionFactory};
use crate::resilience::{CircuitBreakerRegistry, RetryPolicy};

/// Settings that may change while batches are running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSettings {
    /// Kill switch: every batch runs sequentially.
    pub force_sequential: bool,
    pub execution_mode: ExecutionMode,
    pub max_concurrency: usize,
}

impl LiveSettings {
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self {
            force_sequential: config.force_sequential,
            execution_mode: config.execution_mode,
            max_concurrency: config.max_concurrency,
        }
    }
}

pub struct OrchestratorContext {
    config: OrchestratorConfig,
    pool: ConnectionManager,
    locks: ResourceLockTable,
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
    live: ArcSwap<LiveSettings>,
}

impl OrchestratorContext {
    /// Build a context from a config. Fails with `Fatal` listing every
    /// range violation if the config does not validate.
    pub fn new(config: OrchestratorConfig, factory: Arc<dyn ConnectionFactory>) -> OrchestratorResult<Self> {
        check(&config)?;
        let pool = ConnectionManager::new(factory, &config.pool)?;
        let live = LiveSettings::from_config(&config.concurrency);
        metrics::set_max_concurrency(live.max_concurrency);

        Ok(Self {
            pool,
            locks: ResourceLockTable::new(config.locks.timeout()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            retry: RetryPolicy::from_config(&config.retries),
            live: ArcSwap::from_pointee(live),
            config,
        })
    }

    /// Context talking to the configured remote over HTTP.
    pub fn from_config(config: OrchestratorConfig) -> OrchestratorResult<Self> {
        check(&config)?;
        let factory = HttpConnectionFactory::from_config(&config.remote)?;
        Self::new(config, Arc::new(factory))
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionManager {
        &self.pool
    }

    pub fn locks(&self) -> &ResourceLockTable {
        &self.locks
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn settings(&self) -> Arc<LiveSettings> {
        self.live.load_full()
    }

    /// Swap in the concurrency settings of a reloaded config.
    ///
    /// Pool, lock and breaker parameters only take effect on restart. An
    /// invalid config is rejected and the current settings stay in place.
    pub fn apply_config(&self, config: &OrchestratorConfig) -> OrchestratorResult<()> {
        check(config)?;
        let next = LiveSettings::from_config(&config.concurrency);
        let previous = self.live.swap(Arc::new(next.clone()));
        if *previous != next {
            tracing::info!(
                force_sequential = next.force_sequential,
                execution_mode = %next.execution_mode,
                max_concurrency = next.max_concurrency,
                "Concurrency settings updated"
            );
            metrics::set_max_concurrency(next.max_concurrency);
        }
        Ok(())
    }
}

fn check(config: &OrchestratorConfig) -> OrchestratorResult<()> {
    validate_config(config).map_err(|errors| {
        let violations: Vec<String> = errors.iter().map(ToString::to_string).collect();
        OrchestratorError::fatal(format!("invalid configuration: {}", violations.join("; ")))
    })
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("settings", &self.settings())
            .field("pool", &self.pool.stats())
            .finish()
    }
}
