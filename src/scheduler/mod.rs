//! Batch scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! BatchJob (ordered WorkItems)
//!     → batch.rs BatchScheduler::run_batch (semaphore-bounded tasks)
//!     → per item: locks → retries → circuit breaker (gated runs) → pool → ItemProcessor
//!     → result.rs OperationResult per item, folded into a BatchResult
//! ```

pub mod batch;
pub mod job;
pub mod result;

pub use batch::{BatchScheduler, ExecutionPlan, SystemicFailure};
pub use job::{new_correlation_id, BatchJob, BatchUpdateProcessor, ItemOutput, ItemProcessor, WorkItem};
pub use result::{BatchResult, OperationResult, ProcessingMode};
