//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Work item (resource lock already held):
//!     → retries.rs (bounded retry, backoff between attempts)
//!     → circuit_breaker.rs (per operation class, fail fast while open)
//!     → pool acquire
//!     → timeouts.rs (deadline on the remote call)
//! ```
//!
//! # Design Decisions
//! - Every remote call has a deadline
//! - Breaker outcomes are recorded per attempt, so retries count as failures
//! - Retries stop at an open breaker instead of spinning on it

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::Backoff;
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState, OperationClass};
pub use retries::{classify, RetryDecision, RetryOutcome, RetryPolicy};
pub use timeouts::with_deadline;
