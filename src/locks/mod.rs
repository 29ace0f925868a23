//! Per-resource mutual exclusion.
//!
//! # Responsibilities
//! - Guarantee at most one in-flight mutation per resource key, across every
//!   batch and caller sharing the table
//! - Bound the wait for a lock
//!
//! # Design Decisions
//! - Locks are created on first use and never removed, so no caller can race
//!   a deletion and end up holding a lock nobody else sees
//! - The guard is an owned RAII value: normal return, error, panic and task
//!   cancellation all release it

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::observability::metrics;

/// Identifier of the remote document a mutation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of exclusive locks keyed by resource.
#[derive(Debug)]
pub struct ResourceLockTable {
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
    timeout: Duration,
    contended: AtomicU64,
}

impl ResourceLockTable {
    /// Create an empty table with the given bounded wait.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            contended: AtomicU64::new(0),
        }
    }

    fn lock_for(&self, key: &ResourceKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Run `f` while holding the exclusive lock for `key`.
    ///
    /// Fails with `LockTimeout` if the lock is not acquired within the
    /// configured wait; `f` is not started in that case.
    pub async fn with_lock<F, Fut, T>(&self, key: &ResourceKey, f: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.with_lock_until(key, None, f).await
    }

    /// Like [`with_lock`](Self::with_lock), but gives up with `Cancelled` once
    /// `deadline` passes before the lock is taken.
    pub async fn with_lock_until<F, Fut, T>(
        &self,
        key: &ResourceKey,
        deadline: Option<tokio::time::Instant>,
        f: F,
    ) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if deadline.is_some_and(|d| d <= tokio::time::Instant::now()) {
            return Err(deadline_elapsed(key));
        }

        let lock = self.lock_for(key);
        let started = Instant::now();

        let _guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(resource_key = %key, "Waiting for resource lock");
                let timeout_at = tokio::time::Instant::now() + self.timeout;
                let (wait_until, cut_by_deadline) = match deadline {
                    Some(d) if d < timeout_at => (d, true),
                    _ => (timeout_at, false),
                };
                match tokio::time::timeout_at(wait_until, lock.lock_owned()).await {
                    Ok(guard) => guard,
                    Err(_) if cut_by_deadline => return Err(deadline_elapsed(key)),
                    Err(_) => {
                        tracing::warn!(resource_key = %key, waited = ?self.timeout, "Resource lock wait timed out");
                        metrics::record_lock_timeout();
                        return Err(OrchestratorError::LockTimeout {
                            key: key.to_string(),
                            waited: self.timeout,
                        });
                    }
                }
            }
        };

        metrics::record_lock_wait(started.elapsed());
        Ok(f().await)
    }

    /// True if some caller currently holds the lock for `key`.
    pub fn is_locked(&self, key: &ResourceKey) -> bool {
        self.locks
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// How many acquisitions had to wait for another holder.
    pub fn contended_count(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

fn deadline_elapsed(key: &ResourceKey) -> OrchestratorError {
    tracing::debug!(resource_key = %key, "Batch deadline passed while waiting for resource lock");
    OrchestratorError::Cancelled("batch deadline elapsed before the item started".to_string())
}
