//! Scheduler behavior under concurrency, failures and deadlines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deck_orchestrator::config::ExecutionMode;
use deck_orchestrator::remote::{Mutation, Transport};
use deck_orchestrator::resilience::OperationClass;
use deck_orchestrator::scheduler::{BatchScheduler, ExecutionPlan, ItemOutput, ItemProcessor};
use deck_orchestrator::{
    BatchJob, ErrorKind, FallbackController, OrchestratorError, OrchestratorResult, ProcessingMode, WorkItem,
};

mod common;
use common::{context, test_config, text_items, token, Fault, MockTransport};

#[tokio::test]
async fn test_no_per_key_overlap_at_any_concurrency() {
    for concurrency in 1..=5 {
        let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(5)));
        let ctx = context(test_config(concurrency), &mock);
        let scheduler = BatchScheduler::new(ctx);

        let job = BatchJob::new("text-replace", text_items(3, 12));
        let result = scheduler
            .run_batch(&job, ExecutionPlan::concurrent(concurrency))
            .await
            .unwrap();

        assert_eq!(result.results.len(), 12);
        assert!(result.success);
        assert_eq!(mock.overlaps(), 0, "overlap at concurrency {}", concurrency);
        assert!(mock.max_in_flight() <= concurrency.min(3));
    }
}

#[tokio::test]
async fn test_seven_items_three_keys_with_flaky_item() {
    let flaky = token(4);
    let mock = Arc::new(
        MockTransport::new()
            .with_latency(Duration::from_millis(10))
            .fail_token(&flaky, &[Fault::Transient, Fault::Transient]),
    );
    let ctx = context(test_config(3), &mock);
    let controller = FallbackController::new(ctx);

    let job = BatchJob::new("text-replace", text_items(3, 7));
    let result = controller.execute(&job, Some(ExecutionMode::Concurrent)).await;

    assert_eq!(result.processing_mode, ProcessingMode::Concurrent);
    assert_eq!(result.results.len(), 7);
    assert_eq!(result.succeeded, 7);
    assert!(result.success);
    assert_eq!(result.results[4].attempts, 3);
    assert_eq!(result.results[4].api_calls, 3);
    assert_eq!(mock.calls_for(&flaky), 3);
    assert!(result.results.iter().enumerate().all(|(i, r)| i == 4 || r.attempts == 1));
    assert_eq!(mock.overlaps(), 0);
    assert_eq!(result.breaker_trips, 0);
}

#[tokio::test]
async fn test_fatal_item_isolated_from_siblings() {
    let bad = token(2);
    let mock = Arc::new(MockTransport::new().fail_token(&bad, &[Fault::Fatal]));
    let ctx = context(test_config(3), &mock);
    let scheduler = BatchScheduler::new(ctx);

    let job = BatchJob::new("text-replace", text_items(5, 5));
    let result = scheduler.run_batch(&job, ExecutionPlan::concurrent(3)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.failed, 1);
    let failed = &result.results[2];
    assert_eq!(failed.error_kind(), Some(ErrorKind::Fatal));
    assert_eq!(failed.attempts, 1);
    assert_eq!(mock.calls_for(&bad), 1);
}

#[tokio::test]
async fn test_transient_exhaustion_is_terminal_result() {
    let bad = token(0);
    let mock = Arc::new(MockTransport::new().fail_token(&bad, &[Fault::Transient; 5]));
    let ctx = context(test_config(1), &mock);
    let scheduler = BatchScheduler::new(ctx);

    let job = BatchJob::new("text-replace", text_items(1, 1));
    let result = scheduler
        .run_batch(&job, ExecutionPlan::sequential(ProcessingMode::EmergencySequential))
        .await
        .unwrap();

    let item = &result.results[0];
    assert!(!item.success);
    assert_eq!(item.error_kind(), Some(ErrorKind::Transient));
    // max_attempts = 2 retries after the first call.
    assert_eq!(item.attempts, 3);
    assert_eq!(mock.calls_for(&bad), 3);
}

#[tokio::test]
async fn test_breaker_stops_remote_calls_at_threshold() {
    let mock = Arc::new(MockTransport::new().fail_document("deck-0", Fault::Fatal));
    let mut config = test_config(1);
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_ms = 60_000;
    let ctx = context(config, &mock);
    let scheduler = BatchScheduler::new(ctx.clone());

    let job = BatchJob::new("text-replace", text_items(1, 5));
    let result = scheduler.run_batch(&job, ExecutionPlan::concurrent(1)).await.unwrap();

    assert_eq!(mock.calls(), 2);
    assert_eq!(result.results.len(), 5);
    assert_eq!(result.results[0].error_kind(), Some(ErrorKind::Fatal));
    assert_eq!(result.results[1].error_kind(), Some(ErrorKind::Fatal));
    assert!(result.results[2..]
        .iter()
        .all(|r| r.error_kind() == Some(ErrorKind::CircuitOpen) && r.api_calls == 0));
    assert_eq!(result.breaker_trips, 1);
    assert!(ctx.breakers().is_open(&OperationClass::text_replace()));
}

#[tokio::test]
async fn test_breaker_trips_counted_for_own_classes_only() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(20)));
    let mut config = test_config(2);
    config.circuit_breaker.failure_threshold = 1;
    let ctx = context(config, &mock);
    let scheduler = BatchScheduler::new(ctx.clone());

    let job = BatchJob::new("text-replace", text_items(2, 4));
    let image = OperationClass::image_replace();
    let image_outage = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = ctx
            .breakers()
            .call_with_breaker(&image, || async { Err::<(), _>(OrchestratorError::fatal("400")) })
            .await;
    };
    let (result, ()) = tokio::join!(scheduler.run_batch(&job, ExecutionPlan::concurrent(2)), image_outage);

    let result = result.unwrap();
    assert!(result.success);
    assert_eq!(result.breaker_trips, 0);
    assert_eq!(ctx.breakers().trips(), 1);
    assert!(ctx.breakers().is_open(&image));
}

#[tokio::test]
async fn test_concurrent_and_sequential_apply_same_mutations() {
    let job_items = text_items(4, 10);

    let concurrent_mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(2)));
    let concurrent = FallbackController::new(context(test_config(4), &concurrent_mock));
    let a = concurrent
        .execute(&BatchJob::new("text-replace", job_items.clone()), Some(ExecutionMode::Concurrent))
        .await;

    let sequential_mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(2)));
    let sequential = FallbackController::new(context(test_config(4), &sequential_mock));
    let b = sequential
        .execute(&BatchJob::new("text-replace", job_items), Some(ExecutionMode::Sequential))
        .await;

    assert!(a.success && b.success);
    assert_eq!(a.processing_mode, ProcessingMode::Concurrent);
    assert_eq!(b.processing_mode, ProcessingMode::EmergencySequential);
    assert_eq!(sequential_mock.max_in_flight(), 1);
    assert_eq!(concurrent_mock.applied(), sequential_mock.applied());
    assert_eq!(concurrent_mock.applied().len(), 10);
}

#[tokio::test]
async fn test_independent_batches_share_resource_locks() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(5)));
    let ctx = context(test_config(3), &mock);
    let scheduler = BatchScheduler::new(ctx);

    let first = BatchJob::new("text-replace", text_items(2, 6));
    let second = BatchJob::new("text-replace", text_items(2, 6));
    let (a, b) = tokio::join!(
        scheduler.run_batch(&first, ExecutionPlan::concurrent(3)),
        scheduler.run_batch(&second, ExecutionPlan::concurrent(3)),
    );

    assert!(a.unwrap().success);
    assert!(b.unwrap().success);
    assert_eq!(mock.overlaps(), 0);
}

#[tokio::test]
async fn test_batch_deadline_cancels_pending_items() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(100)));
    let mut config = test_config(1);
    config.concurrency.batch_timeout_ms = 150;
    let ctx = context(config, &mock);
    let scheduler = BatchScheduler::new(ctx);

    let job = BatchJob::new("text-replace", text_items(5, 5));
    let result = scheduler.run_batch(&job, ExecutionPlan::concurrent(1)).await.unwrap();

    assert_eq!(result.results.len(), 5);
    // In-flight items run to completion.
    assert!(result.results[0].success);
    assert!(result.results[1].success);
    assert!(result.results[2..]
        .iter()
        .all(|r| r.error_kind() == Some(ErrorKind::Cancelled) && r.attempts == 0));
}

#[tokio::test]
async fn test_batch_deadline_cancels_items_queued_on_shared_key() {
    let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(100)));
    let mut config = test_config(3);
    config.concurrency.batch_timeout_ms = 150;
    let ctx = context(config, &mock);
    let scheduler = BatchScheduler::new(ctx.clone());

    // One document: the dispatched items queue on its lock.
    let job = BatchJob::new("text-replace", text_items(1, 5));
    let result = scheduler.run_batch(&job, ExecutionPlan::concurrent(3)).await.unwrap();

    assert_eq!(result.results.len(), 5);
    assert!(result.results[0].success);
    assert!(result.results[1].success);
    assert!(result.results[2..]
        .iter()
        .all(|r| r.error_kind() == Some(ErrorKind::Cancelled) && r.attempts == 0 && r.api_calls == 0));
    assert_eq!(mock.calls(), 2);
    assert_eq!(mock.overlaps(), 0);
    assert!(!ctx.locks().is_locked(&result.results[0].resource_key));
}

struct PanickingProcessor;

#[async_trait]
impl ItemProcessor for PanickingProcessor {
    async fn process(&self, _transport: &dyn Transport, _item: &WorkItem) -> OrchestratorResult<ItemOutput> {
        panic!("renderer exploded");
    }
}

#[tokio::test]
async fn test_panicking_item_is_contained() {
    let mock = Arc::new(MockTransport::new());
    let ctx = context(test_config(2), &mock);
    let scheduler = BatchScheduler::new(ctx.clone());

    let mut items = text_items(3, 3);
    items[1] = items[1].clone().with_processor(Arc::new(PanickingProcessor));
    let job = BatchJob::new("text-replace", items);
    let result = scheduler.run_batch(&job, ExecutionPlan::concurrent(2)).await.unwrap();

    assert_eq!(result.succeeded, 2);
    let panicked = &result.results[1];
    assert_eq!(panicked.error_kind(), Some(ErrorKind::Fatal));
    assert!(panicked.error.as_ref().unwrap().message.contains("renderer exploded"));

    // Lock and pool slot were released by the unwinding item.
    assert!(!ctx.locks().is_locked(&panicked.resource_key));
    assert_eq!(ctx.pool().stats().in_use, 0);
}

#[tokio::test]
async fn test_transport_failures_reset_pool_on_sequential_path() {
    let mock = Arc::new(MockTransport::new().fail_token(&token(0), &[Fault::Transport, Fault::Transport]));
    let ctx = context(test_config(2), &mock);
    let scheduler = BatchScheduler::new(ctx.clone());

    let job = BatchJob::new("text-replace", text_items(1, 1));
    let result = scheduler
        .run_batch(&job, ExecutionPlan::sequential(ProcessingMode::EmergencySequential))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.results[0].attempts, 3);
    assert_eq!(ctx.pool().stats().resets, 1);
}

struct CountingProcessor {
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl ItemProcessor for CountingProcessor {
    async fn process(&self, transport: &dyn Transport, item: &WorkItem) -> OrchestratorResult<ItemOutput> {
        self.seen.fetch_add(item.mutations.len(), Ordering::SeqCst);
        let requests = item.mutations.iter().map(Mutation::to_request).collect();
        transport.batch_update(item.resource_key.as_str(), requests).await?;
        Ok(ItemOutput {
            objects_processed: item.mutations.len(),
        })
    }
}

#[tokio::test]
async fn test_custom_processor_and_object_counts() {
    let mock = Arc::new(MockTransport::new());
    let ctx = context(test_config(2), &mock);
    let controller = FallbackController::new(ctx);
    let seen = Arc::new(AtomicUsize::new(0));

    let items: Vec<WorkItem> = (0..3)
        .map(|i| {
            WorkItem::new(
                format!("deck-{i}"),
                OperationClass::image_replace(),
                vec![
                    Mutation::replace_image(format!("{{{{chart{i}}}}}"), "https://example.com/a.png"),
                    Mutation::replace_image(format!("{{{{logo{i}}}}}"), "https://example.com/b.png"),
                ],
            )
            .with_processor(Arc::new(CountingProcessor { seen: seen.clone() }))
        })
        .collect();
    let result = controller.execute(&BatchJob::new("image-replace", items), None).await;

    assert!(result.success);
    assert_eq!(result.objects_processed(), 6);
    assert_eq!(result.api_calls(), 3);
    assert_eq!(seen.load(Ordering::SeqCst), 6);

    let per_key: HashMap<_, _> = result
        .results
        .iter()
        .map(|r| (r.resource_key.to_string(), r.mode))
        .collect();
    assert_eq!(per_key.len(), 3);
    assert!(per_key.values().all(|m| *m == ProcessingMode::Concurrent));
}
