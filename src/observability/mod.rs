//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Locks, pool, breakers, retries, scheduler, fallback controller:
//!     → logging.rs (structured tracing events, correlation id on every batch span)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log lines
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
