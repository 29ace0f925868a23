//! Bounded-concurrency batch execution.
//!
//! # Responsibilities
//! - Run a job's items with at most `max_concurrency` in flight
//! - Drive each item through lock → retry → breaker → pool → remote call
//! - Isolate item failures and return exactly one result per item
//! - Stop dispatching on batch deadline or on a systemic failure
//!
//! # Design Decisions
//! - A permit is taken before a task is spawned, so fan-out never exceeds
//!   the limit; `max_concurrency = 1` is plain serial execution
//! - In-flight items are never aborted; items that have not taken their
//!   resource lock by the batch deadline are cancelled
//! - Panics are caught per item and reported as fatal failures

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::{ErrorKind, ItemError, OrchestratorError, OrchestratorResult};
use crate::observability::metrics;
use crate::orchestrator::OrchestratorContext;
use crate::pool::PoolHealth;
use crate::resilience::with_deadline;
use crate::scheduler::job::{BatchJob, ItemOutput, WorkItem};
use crate::scheduler::result::{BatchResult, OperationResult, ProcessingMode};

/// How the scheduler should run a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub mode: ProcessingMode,
    pub max_concurrency: usize,
    /// Route attempts through the circuit breakers and escalate systemic
    /// failures. Off for the sequential paths.
    pub gated: bool,
}

impl ExecutionPlan {
    pub fn concurrent(max_concurrency: usize) -> Self {
        Self {
            mode: ProcessingMode::Concurrent,
            max_concurrency: max_concurrency.max(1),
            gated: true,
        }
    }

    pub fn sequential(mode: ProcessingMode) -> Self {
        Self {
            mode,
            max_concurrency: 1,
            gated: false,
        }
    }
}

/// A gated run found the concurrent path unsafe.
#[derive(Debug, Error)]
#[error("systemic failure: {reason}")]
pub struct SystemicFailure {
    pub reason: String,
    /// Results gathered before the run was abandoned, cancelled items included.
    pub partial: BatchResult,
}

enum Slot {
    Permit(OwnedSemaphorePermit),
    Deadline,
    Abort(String),
}

/// Runs batch jobs against a shared context.
#[derive(Clone)]
pub struct BatchScheduler {
    ctx: Arc<OrchestratorContext>,
}

impl BatchScheduler {
    pub fn new(ctx: Arc<OrchestratorContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.ctx
    }

    /// Run every item of `job` under `plan`.
    ///
    /// Item failures are data in the returned result. `Err` is only returned
    /// for gated plans that hit a systemic failure.
    pub async fn run_batch(&self, job: &BatchJob, plan: ExecutionPlan) -> Result<BatchResult, SystemicFailure> {
        let span = tracing::info_span!(
            "batch",
            correlation_id = %job.correlation_id,
            label = %job.label,
            mode = plan.mode.as_str()
        );
        self.run_batch_inner(job, plan).instrument(span).await
    }

    async fn run_batch_inner(&self, job: &BatchJob, plan: ExecutionPlan) -> Result<BatchResult, SystemicFailure> {
        let started = Instant::now();
        let classes = job.operation_classes();
        let trips_before = self.ctx.breakers().trips_for(&classes);
        let total = job.items.len();
        let limit = plan.max_concurrency.max(1);
        let stagger = self.ctx.config().concurrency.item_stagger();
        let deadline = self
            .ctx
            .config()
            .concurrency
            .batch_timeout()
            .map(|t| tokio::time::Instant::now() + t);

        tracing::debug!(items = total, max_concurrency = limit, "Batch started");

        let semaphore = Arc::new(Semaphore::new(limit));
        let (abort_tx, mut abort_rx) = watch::channel::<Option<String>>(None);
        let abort_tx = Arc::new(abort_tx);

        let mut slots: Vec<Option<OperationResult>> = vec![None; total];
        let mut tasks = JoinSet::new();
        let mut stop: Option<(ErrorKind, String)> = None;
        let mut dispatched = 0usize;

        for index in 0..total {
            if index > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }

            let permit = match wait_for_slot(&semaphore, deadline, &mut abort_rx).await {
                Slot::Permit(permit) => permit,
                Slot::Deadline => {
                    tracing::warn!(dispatched = index, items = total, "Batch deadline elapsed, cancelling pending items");
                    stop = Some((ErrorKind::Cancelled, "batch deadline elapsed before the item started".to_string()));
                    break;
                }
                Slot::Abort(reason) => {
                    tracing::warn!(dispatched = index, items = total, reason = %reason, "Systemic failure, cancelling pending items");
                    stop = Some((ErrorKind::Cancelled, format!("batch aborted: {reason}")));
                    break;
                }
            };

            let runner = self.clone();
            let items = job.items.clone();
            let abort_tx = abort_tx.clone();
            let item_span = tracing::debug_span!(
                "item",
                index,
                resource_key = %items[index].resource_key,
                operation_class = %items[index].operation_class
            );
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let item = &items[index];
                    let started = Instant::now();
                    let result = match AssertUnwindSafe(runner.run_item(item, index, plan, deadline)).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => {
                            let message = format!("item processor panicked: {}", panic_message(panic.as_ref()));
                            tracing::error!(error = %message, "Work item panicked");
                            failed_result(item, index, plan.mode, ItemError { kind: ErrorKind::Fatal, message }, started, 1, 0)
                        }
                    };
                    if plan.gated && result.error_kind() == Some(ErrorKind::SystemicFailure) {
                        let reason = result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default();
                        abort_tx.send_if_modified(|current| {
                            if current.is_none() {
                                *current = Some(reason);
                                true
                            } else {
                                false
                            }
                        });
                    }
                    (index, result)
                }
                .instrument(item_span),
            );
            dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Work item task failed"),
            }
        }

        let mut results = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            let result = match slot {
                Some(result) => result,
                None => {
                    let item = &job.items[index];
                    let error = match &stop {
                        Some((kind, message)) if index >= dispatched => ItemError {
                            kind: *kind,
                            message: message.clone(),
                        },
                        _ => ItemError {
                            kind: ErrorKind::Fatal,
                            message: "work item task ended without a result".to_string(),
                        },
                    };
                    cancelled_or_lost(item, index, plan.mode, error)
                }
            };
            metrics::record_item(
                result.operation_class.as_str(),
                result.error_kind().map(|k| k.as_str()).unwrap_or("ok"),
            );
            results.push(result);
        }

        // Another batch sharing a class can still trip it meanwhile.
        let trips = self.ctx.breakers().trips_for(&classes).saturating_sub(trips_before);
        let batch = BatchResult::from_results(
            job.correlation_id.clone(),
            job.label.clone(),
            plan.mode,
            results,
            started.elapsed().as_millis() as u64,
            trips,
        );

        tracing::debug!(
            succeeded = batch.succeeded,
            failed = batch.failed,
            elapsed_ms = batch.elapsed_ms,
            "Batch finished"
        );

        if plan.gated {
            let systemic_reason = abort_tx.borrow().clone().or_else(|| all_circuit_open(&batch));
            if let Some(reason) = systemic_reason {
                return Err(SystemicFailure { reason, partial: batch });
            }
        }
        Ok(batch)
    }

    /// One item, start to finish. Never fails; errors become the result.
    ///
    /// An item still queued on its resource lock when `deadline` passes is
    /// reported `Cancelled` without touching the remote.
    async fn run_item(
        &self,
        item: &WorkItem,
        index: usize,
        plan: ExecutionPlan,
        deadline: Option<tokio::time::Instant>,
    ) -> OperationResult {
        let started = Instant::now();
        let api_calls = AtomicU32::new(0);

        let locked = self
            .ctx
            .locks()
            .with_lock_until(&item.resource_key, deadline, || async {
                self.ctx
                    .retry()
                    .execute_with_retry(|| self.attempt(item, plan.gated, &api_calls))
                    .await
            })
            .await;

        let (result, attempts) = match locked {
            Ok(outcome) => (outcome.result, outcome.attempts),
            Err(e) => (Err(e), 0),
        };
        let api_calls = api_calls.load(Ordering::SeqCst);

        match result {
            Ok(output) => OperationResult {
                index,
                resource_key: item.resource_key.clone(),
                operation_class: item.operation_class.clone(),
                success: true,
                error: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
                mode: plan.mode,
                objects_processed: output.objects_processed,
                api_calls,
                attempts,
            },
            Err(e) => {
                tracing::warn!(attempts, error = %e, "Work item failed");
                failed_result(item, index, plan.mode, ItemError::from(&e), started, attempts, api_calls)
            }
        }
    }

    async fn attempt(&self, item: &WorkItem, gated: bool, api_calls: &AtomicU32) -> OrchestratorResult<ItemOutput> {
        if gated {
            self.ctx
                .breakers()
                .call_with_breaker(&item.operation_class, || self.call_remote(item, gated, api_calls))
                .await
        } else {
            self.call_remote(item, gated, api_calls).await
        }
    }

    async fn call_remote(&self, item: &WorkItem, gated: bool, api_calls: &AtomicU32) -> OrchestratorResult<ItemOutput> {
        let pool = self.ctx.pool();
        let connection = pool.acquire().await?;
        let generation = connection.generation();
        api_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = with_deadline(
            self.ctx.config().remote.request_timeout(),
            "batch update",
            item.processor.process(connection.transport(), item),
        )
        .await;
        drop(connection);

        match outcome {
            Ok(output) => {
                pool.record_success();
                Ok(output)
            }
            Err(e) if e.is_transport() => match pool.record_transport_failure(generation).await {
                PoolHealth::Poisoned if gated => Err(OrchestratorError::Systemic(format!(
                    "connection pool poisoned after repeated transport failures: {e}"
                ))),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

async fn wait_for_slot(
    semaphore: &Arc<Semaphore>,
    deadline: Option<tokio::time::Instant>,
    abort_rx: &mut watch::Receiver<Option<String>>,
) -> Slot {
    let deadline_elapsed = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        reason = wait_for_abort(abort_rx) => Slot::Abort(reason),
        _ = deadline_elapsed => Slot::Deadline,
        permit = semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => Slot::Permit(permit),
            Err(_) => Slot::Abort("scheduler semaphore closed".to_string()),
        },
    }
}

async fn wait_for_abort(abort_rx: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = abort_rx.borrow_and_update().clone() {
            return reason;
        }
        if abort_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// Every item failed because its breaker was open: nothing reached the remote.
fn all_circuit_open(batch: &BatchResult) -> Option<String> {
    if batch.results.is_empty() {
        return None;
    }
    let all_open = batch
        .results
        .iter()
        .all(|r| r.error_kind() == Some(ErrorKind::CircuitOpen));
    all_open.then(|| "circuit breaker open for every item".to_string())
}

fn failed_result(
    item: &WorkItem,
    index: usize,
    mode: ProcessingMode,
    error: ItemError,
    started: Instant,
    attempts: u32,
    api_calls: u32,
) -> OperationResult {
    OperationResult {
        index,
        resource_key: item.resource_key.clone(),
        operation_class: item.operation_class.clone(),
        success: false,
        error: Some(error),
        elapsed_ms: started.elapsed().as_millis() as u64,
        mode,
        objects_processed: 0,
        api_calls,
        attempts,
    }
}

fn cancelled_or_lost(item: &WorkItem, index: usize, mode: ProcessingMode, error: ItemError) -> OperationResult {
    OperationResult {
        index,
        resource_key: item.resource_key.clone(),
        operation_class: item.operation_class.clone(),
        success: false,
        error: Some(error),
        elapsed_ms: 0,
        mode,
        objects_processed: 0,
        api_calls: 0,
        attempts: 0,
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
