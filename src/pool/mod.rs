//! Connection pooling subsystem.
//!
//! # Data Flow
//! ```text
//! Work item attempt
//!     → manager.rs acquire() (bounded wait on a permit, else PoolExhausted)
//!     → connection.rs PooledConnection (RAII checkout guard)
//!     → remote call
//!     → drop: entry returns to the idle queue (or is discarded if stale)
//!
//! Transport failure:
//!     → record_transport_failure() counts consecutive connection-level faults
//!     → threshold reached: reset() bumps the generation and reopens the pool
//! ```
//!
//! # Design Decisions
//! - Pool size bounds in-flight remote calls independently of the scheduler
//! - Generations make reset safe while connections are checked out
//! - reset() is serialized by an async mutex

pub mod connection;
pub mod manager;

pub use connection::{ConnectionId, PooledConnection};
pub use manager::{ConnectionManager, PoolHealth, PoolStats};
