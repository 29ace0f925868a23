//! Connection pool management.
//!
//! # Responsibilities
//! - Hold a bounded set of reusable transports
//! - Hand them out with a bounded wait
//! - Drain and recreate the set when transport failures pile up

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::PoolConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::observability::metrics;
use crate::pool::connection::{ConnectionId, PoolEntry, PooledConnection};
use crate::remote::ConnectionFactory;

/// Outcome of reporting a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Healthy,
    /// The failure threshold was reached and the pool has been reset.
    Poisoned,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub generation: u64,
    pub resets: u64,
}

pub(crate) struct PoolShared {
    factory: Arc<dyn ConnectionFactory>,
    size: usize,
    acquire_timeout: Duration,
    reset_threshold: u32,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PoolEntry>>,
    generation: AtomicU64,
    in_use: AtomicUsize,
    transport_failures: AtomicU32,
    resets: AtomicU64,
    reset_lock: tokio::sync::Mutex<()>,
}

impl PoolShared {
    fn create_entry(&self, generation: u64) -> OrchestratorResult<PoolEntry> {
        let transport = self.factory.connect()?;
        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, generation, "Connection created");
        Ok(PoolEntry {
            id,
            transport,
            generation,
            last_used: Instant::now(),
        })
    }

    fn idle_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<PoolEntry>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return an entry after use. Stale entries are dropped.
    pub(crate) fn check_in(&self, entry: PoolEntry) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if entry.generation == self.generation.load(Ordering::SeqCst) {
            self.idle_entries().push_back(entry);
        } else {
            tracing::debug!(connection_id = %entry.id, "Discarding connection from previous pool generation");
        }
    }
}

/// Owns the pool of transports to the remote API.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<PoolShared>,
}

impl ConnectionManager {
    /// Create the pool and open `config.size` connections up front.
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: &PoolConfig) -> OrchestratorResult<Self> {
        let size = config.size.max(1);
        let shared = Arc::new(PoolShared {
            factory,
            size,
            acquire_timeout: config.acquire_timeout(),
            reset_threshold: config.reset_after_transport_failures.max(1),
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(VecDeque::with_capacity(size)),
            generation: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
            transport_failures: AtomicU32::new(0),
            resets: AtomicU64::new(0),
            reset_lock: tokio::sync::Mutex::new(()),
        });

        {
            let mut idle = shared.idle_entries();
            for _ in 0..size {
                idle.push_back(shared.create_entry(0)?);
            }
        }

        tracing::info!(size, acquire_timeout = ?shared.acquire_timeout, "Connection pool initialized");
        Ok(Self { shared })
    }

    /// Check out a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> OrchestratorResult<PooledConnection> {
        let wait = self.shared.acquire_timeout;
        let permit = match tokio::time::timeout(wait, self.shared.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(waited = ?wait, "No pooled connection became available");
                metrics::record_pool_exhausted();
                return Err(OrchestratorError::PoolExhausted(wait));
            }
        };

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let reused = {
            let mut idle = self.shared.idle_entries();
            let mut found = None;
            while let Some(entry) = idle.pop_front() {
                if entry.generation == generation {
                    found = Some(entry);
                    break;
                }
            }
            found
        };

        let entry = match reused {
            Some(entry) => entry,
            None => self.shared.create_entry(generation)?,
        };

        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            connection_id = %entry.id,
            idle_for = ?entry.last_used.elapsed(),
            "Connection acquired"
        );

        Ok(PooledConnection {
            id: entry.id,
            transport: entry.transport,
            generation: entry.generation,
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Drain and recreate the pool.
    ///
    /// Connections checked out at the time of the reset are discarded when
    /// released. Concurrent calls are serialized.
    pub async fn reset(&self) -> OrchestratorResult<()> {
        let _guard = self.shared.reset_lock.lock().await;
        self.reset_locked()
    }

    fn reset_locked(&self) -> OrchestratorResult<()> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.transport_failures.store(0, Ordering::SeqCst);
        self.shared.resets.fetch_add(1, Ordering::SeqCst);
        metrics::record_pool_reset();
        tracing::warn!(generation, "Resetting connection pool");

        let mut fresh = VecDeque::with_capacity(self.shared.size);
        let mut failure = None;
        for _ in 0..self.shared.size {
            match self.shared.create_entry(generation) {
                Ok(entry) => fresh.push_back(entry),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        *self.shared.idle_entries() = fresh;

        match failure {
            // Missing entries are created lazily on the next acquire.
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Count a connection-level failure seen on a connection of `observed_generation`.
    ///
    /// Reaching the configured threshold resets the pool, unless another
    /// caller already reset it since that connection was handed out.
    pub async fn record_transport_failure(&self, observed_generation: u64) -> PoolHealth {
        let failures = self.shared.transport_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.shared.reset_threshold {
            return PoolHealth::Healthy;
        }

        let _guard = self.shared.reset_lock.lock().await;
        if self.shared.generation.load(Ordering::SeqCst) == observed_generation {
            if let Err(e) = self.reset_locked() {
                tracing::error!(error = %e, "Pool reset could not reopen every connection");
            }
        }
        PoolHealth::Poisoned
    }

    /// Clear the consecutive transport failure count.
    pub fn record_success(&self) {
        self.shared.transport_failures.store(0, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.shared.size,
            idle: self.shared.idle_entries().len(),
            in_use: self.shared.in_use.load(Ordering::SeqCst),
            generation: self.generation(),
            resets: self.shared.resets.load(Ordering::SeqCst),
        }
    }
}
