//! Pooled connection identity and checkout guard.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

use crate::pool::manager::PoolShared;
use crate::remote::Transport;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since only uniqueness is needed.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A free connection sitting in the pool.
pub(crate) struct PoolEntry {
    pub(crate) id: ConnectionId,
    pub(crate) transport: Arc<dyn Transport>,
    /// Pool generation the entry was created in; stale after a reset.
    pub(crate) generation: u64,
    pub(crate) last_used: Instant,
}

/// A checked-out connection.
///
/// Returns the transport to the pool on drop unless the pool was reset while
/// it was in use, in which case the stale transport is discarded.
pub struct PooledConnection {
    pub(crate) id: ConnectionId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) generation: u64,
    pub(crate) shared: Arc<PoolShared>,
    pub(crate) _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pool generation this connection belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.shared.check_in(PoolEntry {
            id: self.id,
            transport: self.transport.clone(),
            generation: self.generation,
            last_used: Instant::now(),
        });
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
