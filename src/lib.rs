//! Resilient concurrent batch-update orchestrator.
//!
//! Drives many mutations against a stateful, rate-limited remote document
//! API: bounded concurrency where it is safe, strict per-document
//! serialization, pooled connections, per-class circuit breakers, bounded
//! retries, and a sequential fallback when the concurrent path proves unsafe.

// Core subsystems
pub mod config;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod orchestrator;

// Shared resources
pub mod locks;
pub mod pool;

// Cross-cutting concerns
pub mod collaborator;
pub mod observability;
pub mod resilience;

pub use config::{ExecutionMode, OrchestratorConfig};
pub use error::{ErrorKind, ItemError, OrchestratorError, OrchestratorResult};
pub use orchestrator::{FallbackController, OrchestratorContext};
pub use scheduler::{BatchJob, BatchResult, OperationResult, ProcessingMode, WorkItem};
