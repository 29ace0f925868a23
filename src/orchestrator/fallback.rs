//! Choice between the concurrent path and the safe sequential path.
//!
//! # Mode Resolution
//! ```text
//! kill switch on                       → sequential (emergency-sequential)
//! requested/configured Sequential      → sequential (emergency-sequential)
//! Concurrent                           → concurrent, systemic failure reported as is
//! Auto, a job breaker already open     → sequential (sequential-fallback)
//! Auto                                 → concurrent; systemic failure or panic
//!                                        → whole job again sequentially (sequential-fallback)
//! ```
//!
//! The sequential path runs with `max_concurrency = 1` and without breaker
//! gating, so it always makes progress. `execute` never fails and never
//! lets a panic through.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use futures_util::FutureExt;

use crate::config::ExecutionMode;
use crate::error::{ErrorKind, ItemError};
use crate::observability::metrics;
use crate::orchestrator::context::{LiveSettings, OrchestratorContext};
use crate::resilience::OperationClass;
use crate::scheduler::batch::panic_message;
use crate::scheduler::{BatchJob, BatchResult, BatchScheduler, ExecutionPlan, OperationResult, ProcessingMode};

/// Path chosen for a job before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Concurrent { fallback: bool },
    Sequential { mode: ProcessingMode, reason: Option<String> },
}

/// Decide the path for a job. `open_class` is a job operation class whose
/// breaker is currently rejecting calls, if any.
pub fn resolve_route(
    settings: &LiveSettings,
    requested: Option<ExecutionMode>,
    open_class: Option<&OperationClass>,
) -> Route {
    if settings.force_sequential {
        return Route::Sequential {
            mode: ProcessingMode::EmergencySequential,
            reason: None,
        };
    }
    match requested.unwrap_or(settings.execution_mode) {
        ExecutionMode::Sequential => Route::Sequential {
            mode: ProcessingMode::EmergencySequential,
            reason: None,
        },
        ExecutionMode::Concurrent => Route::Concurrent { fallback: false },
        ExecutionMode::Auto => match open_class {
            Some(class) => Route::Sequential {
                mode: ProcessingMode::SequentialFallback,
                reason: Some(format!("circuit breaker open for '{class}' before the batch started")),
            },
            None => Route::Concurrent { fallback: true },
        },
    }
}

struct Escalation {
    reason: String,
    partial: Option<BatchResult>,
}

/// Top-level entry point for running batch jobs.
#[derive(Clone)]
pub struct FallbackController {
    scheduler: BatchScheduler,
}

impl FallbackController {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self {
            scheduler: BatchScheduler::new(ctx),
        }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        self.scheduler.context()
    }

    /// Run `job`, degrading to sequential execution when needed.
    ///
    /// `requested` overrides the configured execution mode for this job; the
    /// kill switch overrides both.
    pub async fn execute(&self, job: &BatchJob, requested: Option<ExecutionMode>) -> BatchResult {
        let started = Instant::now();
        let ctx = self.context();
        let settings = ctx.settings();
        let open_class = job
            .operation_classes()
            .into_iter()
            .find(|class| ctx.breakers().is_open(class));
        let route = resolve_route(&settings, requested, open_class.as_ref());
        let concurrency = job.max_concurrency.unwrap_or(settings.max_concurrency).max(1);

        tracing::debug!(
            correlation_id = %job.correlation_id,
            route = ?route,
            max_concurrency = concurrency,
            "Execution path resolved"
        );

        let mut result = match route {
            Route::Sequential { mode, reason } => {
                if let Some(reason) = &reason {
                    tracing::warn!(correlation_id = %job.correlation_id, reason = %reason, "Skipping concurrent path");
                    metrics::record_fallback("breaker_open");
                }
                let mut result = self.run_sequential(job, mode).await;
                result.fallback_reason = reason;
                result
            }
            Route::Concurrent { fallback } => match self.run_concurrent(job, concurrency).await {
                Ok(result) => result,
                Err(escalation) if fallback => {
                    tracing::warn!(
                        correlation_id = %job.correlation_id,
                        reason = %escalation.reason,
                        "Concurrent path failed, re-running batch sequentially"
                    );
                    metrics::record_fallback("systemic_failure");
                    let mut result = self.run_sequential(job, ProcessingMode::SequentialFallback).await;
                    result.fallback_reason = Some(escalation.reason);
                    result
                }
                Err(escalation) => {
                    tracing::error!(
                        correlation_id = %job.correlation_id,
                        reason = %escalation.reason,
                        "Concurrent path failed and fallback is disabled"
                    );
                    let mut result = escalation.partial.unwrap_or_else(|| {
                        failed_batch(job, ProcessingMode::Concurrent, &escalation.reason)
                    });
                    result.systemic_failure = Some(escalation.reason);
                    result
                }
            },
        };

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        report(&result);
        result
    }

    async fn run_concurrent(&self, job: &BatchJob, concurrency: usize) -> Result<BatchResult, Escalation> {
        let run = self.scheduler.run_batch(job, ExecutionPlan::concurrent(concurrency));
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(systemic)) => Err(Escalation {
                reason: systemic.reason,
                partial: Some(systemic.partial),
            }),
            Err(panic) => Err(Escalation {
                reason: format!("concurrent path panicked: {}", panic_message(panic.as_ref())),
                partial: None,
            }),
        }
    }

    async fn run_sequential(&self, job: &BatchJob, mode: ProcessingMode) -> BatchResult {
        let run = self.scheduler.run_batch(job, ExecutionPlan::sequential(mode));
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(result)) => result,
            // Ungated runs do not escalate; keep whatever was gathered.
            Ok(Err(systemic)) => systemic.partial,
            Err(panic) => {
                let reason = format!("sequential path panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(correlation_id = %job.correlation_id, error = %reason, "Sequential path panicked");
                failed_batch(job, mode, &reason)
            }
        }
    }
}

// Every item failed with the same reason; used when no per-item results exist.
fn failed_batch(job: &BatchJob, mode: ProcessingMode, reason: &str) -> BatchResult {
    let results = job
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| OperationResult {
            index,
            resource_key: item.resource_key.clone(),
            operation_class: item.operation_class.clone(),
            success: false,
            error: Some(ItemError {
                kind: ErrorKind::SystemicFailure,
                message: reason.to_string(),
            }),
            elapsed_ms: 0,
            mode,
            objects_processed: 0,
            api_calls: 0,
            attempts: 0,
        })
        .collect();
    BatchResult::from_results(job.correlation_id.clone(), job.label.clone(), mode, results, 0, 0)
}

fn report(result: &BatchResult) {
    tracing::info!(
        correlation_id = %result.correlation_id,
        label = %result.label,
        mode = result.processing_mode.as_str(),
        success = result.success,
        succeeded = result.succeeded,
        failed = result.failed,
        elapsed_ms = result.elapsed_ms,
        breaker_trips = result.breaker_trips,
        fallback_reason = result.fallback_reason.as_deref().unwrap_or(""),
        "Batch completed"
    );
    metrics::record_batch(
        result.processing_mode.as_str(),
        std::time::Duration::from_millis(result.elapsed_ms),
        result.succeeded,
        result.failed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(force_sequential: bool, execution_mode: ExecutionMode) -> LiveSettings {
        LiveSettings {
            force_sequential,
            execution_mode,
            max_concurrency: 3,
        }
    }

    #[test]
    fn test_kill_switch_wins() {
        let route = resolve_route(
            &settings(true, ExecutionMode::Concurrent),
            Some(ExecutionMode::Concurrent),
            None,
        );
        assert_eq!(
            route,
            Route::Sequential {
                mode: ProcessingMode::EmergencySequential,
                reason: None
            }
        );
    }

    #[test]
    fn test_requested_mode_overrides_configured() {
        let s = settings(false, ExecutionMode::Auto);
        assert_eq!(
            resolve_route(&s, Some(ExecutionMode::Concurrent), None),
            Route::Concurrent { fallback: false }
        );
        assert!(matches!(
            resolve_route(&s, Some(ExecutionMode::Sequential), None),
            Route::Sequential { mode: ProcessingMode::EmergencySequential, .. }
        ));
        assert_eq!(resolve_route(&s, None, None), Route::Concurrent { fallback: true });
    }

    #[test]
    fn test_open_breaker_skips_concurrent_in_auto() {
        let class = OperationClass::image_replace();
        let s = settings(false, ExecutionMode::Auto);
        match resolve_route(&s, None, Some(&class)) {
            Route::Sequential { mode, reason } => {
                assert_eq!(mode, ProcessingMode::SequentialFallback);
                assert!(reason.unwrap_or_default().contains("image-replace"));
            }
            other => panic!("unexpected route {:?}", other),
        }

        // Explicit concurrent ignores breaker health.
        assert_eq!(
            resolve_route(&s, Some(ExecutionMode::Concurrent), Some(&class)),
            Route::Concurrent { fallback: false }
        );
    }
}
