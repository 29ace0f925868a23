//! Orchestration entry points.
//!
//! # Data Flow
//! ```text
//! caller
//!     → fallback.rs FallbackController::execute (mode resolution, single fallback point)
//!     → scheduler::BatchScheduler::run_batch (concurrent or sequential plan)
//!     → context.rs OrchestratorContext (pool, locks, breakers, retry policy, live settings)
//! ```

pub mod context;
pub mod fallback;

pub use context::{LiveSettings, OrchestratorContext};
pub use fallback::{resolve_route, FallbackController, Route};
