//! Metrics collection and exposition.
//!
//! # Metrics
//! - `deck_batches_total` (counter): batches by processing mode
//! - `deck_batch_duration_seconds` (histogram): wall time per batch
//! - `deck_items_total` (counter): items by operation class and outcome
//! - `deck_retries_total` (counter): retry attempts by error kind
//! - `deck_fallbacks_total` (counter): concurrent runs that fell back to sequential
//! - `deck_breaker_trips_total` / `deck_breaker_rejections_total` (counter): per operation class
//! - `deck_pool_exhausted_total` / `deck_pool_resets_total` (counter)
//! - `deck_lock_timeouts_total` (counter), `deck_lock_wait_seconds` (histogram)
//! - `deck_max_concurrency` (gauge): currently effective concurrency limit
//!
//! Recording is a no-op until a recorder is installed, so library callers and
//! tests pay nothing unless `init_metrics` ran.

use std::net::SocketAddr;
use std::time::Duration;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_batch(mode: &str, duration: Duration, succeeded: usize, failed: usize) {
    counter!("deck_batches_total", "mode" => mode.to_string()).increment(1);
    histogram!("deck_batch_duration_seconds", "mode" => mode.to_string()).record(duration.as_secs_f64());
    counter!("deck_items_succeeded_total", "mode" => mode.to_string()).increment(succeeded as u64);
    counter!("deck_items_failed_total", "mode" => mode.to_string()).increment(failed as u64);
}

/// `outcome` is "ok" or an error kind.
pub fn record_item(operation_class: &str, outcome: &str) {
    counter!(
        "deck_items_total",
        "operation_class" => operation_class.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_retry(error_kind: &str) {
    counter!("deck_retries_total", "error_kind" => error_kind.to_string()).increment(1);
}

pub fn record_fallback(reason: &str) {
    counter!("deck_fallbacks_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_breaker_trip(operation_class: &str) {
    counter!("deck_breaker_trips_total", "operation_class" => operation_class.to_string()).increment(1);
}

pub fn record_breaker_rejection(operation_class: &str) {
    counter!("deck_breaker_rejections_total", "operation_class" => operation_class.to_string()).increment(1);
}

pub fn record_pool_exhausted() {
    counter!("deck_pool_exhausted_total").increment(1);
}

pub fn record_pool_reset() {
    counter!("deck_pool_resets_total").increment(1);
}

pub fn record_lock_timeout() {
    counter!("deck_lock_timeouts_total").increment(1);
}

pub fn record_lock_wait(waited: Duration) {
    histogram!("deck_lock_wait_seconds").record(waited.as_secs_f64());
}

pub fn set_max_concurrency(limit: usize) {
    gauge!("deck_max_concurrency").set(limit as f64);
}
