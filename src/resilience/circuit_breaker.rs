//! Circuit breaker per operation class.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: remote assumed failing, calls fail fast with `CircuitOpen`
//! - Half-Open: one probe call tests whether the remote recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: cooldown elapsed since opening
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per operation class, so an outage of image replacement does
//!   not block text replacement
//! - State lives behind a std mutex that is never held across an await
//! - A cancelled probe frees the probe slot without changing state
//! - Outcomes apply to the state the call was admitted under; late results
//!   of calls admitted while closed never move a half-open breaker

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::observability::metrics;

/// Category of remote call sharing one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationClass(String);

impl OperationClass {
    pub const TEXT_REPLACE: &'static str = "text-replace";
    pub const IMAGE_REPLACE: &'static str = "image-replace";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn text_replace() -> Self {
        Self::new(Self::TEXT_REPLACE)
    }

    pub fn image_replace() -> Self {
        Self::new(Self::IMAGE_REPLACE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationClass {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Probe,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub operation_class: OperationClass,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub trips: u64,
}

/// A single breaker guarding one operation class.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation_class: OperationClass,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(operation_class: OperationClass, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            operation_class,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            trips: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.refresh(&mut inner);
        inner
    }

    // Open → Half-Open once the cooldown has elapsed.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let cooled = inner
                .opened_at
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if cooled {
                tracing::info!(operation_class = %self.operation_class, "Circuit breaker transitioning from OPEN to HALF_OPEN");
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
            }
        }
    }

    fn admit(&self) -> OrchestratorResult<Admission> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Pass),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                tracing::info!(operation_class = %self.operation_class, "Circuit breaker admitting probe call");
                Ok(Admission::Probe)
            }
            _ => {
                metrics::record_breaker_rejection(self.operation_class.as_str());
                Err(OrchestratorError::CircuitOpen(self.operation_class.to_string()))
            }
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        self.trips.fetch_add(1, Ordering::SeqCst);
        metrics::record_breaker_trip(self.operation_class.as_str());
    }

    // Only the probe decides a half-open breaker. A pass admitted while
    // closed that finishes after the breaker opened is ignored.
    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Pass, CircuitState::Closed) => inner.consecutive_failures = 0,
            (Admission::Probe, CircuitState::HalfOpen) => {
                tracing::info!(operation_class = %self.operation_class, "Circuit breaker transitioning from HALF_OPEN to CLOSED");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, error: &OrchestratorError) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Pass, CircuitState::Closed) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::error!(
                        operation_class = %self.operation_class,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "Circuit breaker opening"
                    );
                    self.trip(&mut inner);
                }
            }
            (Admission::Probe, CircuitState::HalfOpen) => {
                tracing::warn!(
                    operation_class = %self.operation_class,
                    error = %error,
                    "Circuit breaker probe failed, returning to OPEN"
                );
                inner.consecutive_failures += 1;
                self.trip(&mut inner);
            }
            _ => {}
        }
    }

    /// Run `f` under the breaker.
    ///
    /// Fails with `CircuitOpen` without calling `f` while the breaker blocks;
    /// otherwise returns `f`'s result and records its outcome.
    pub async fn call<F, Fut, T>(&self, f: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let admission = self.admit()?;
        let mut probe = ProbeSlot {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = f().await;
        probe.armed = false;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) => self.on_failure(admission, e),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// True while calls are rejected without reaching the remote.
    pub fn is_blocking(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => true,
            CircuitState::HalfOpen => inner.probe_in_flight,
        }
    }

    /// Number of times this breaker has opened.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }

    pub fn operation_class(&self) -> &OperationClass {
        &self.operation_class
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            operation_class: self.operation_class.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            cooldown_ms: self.cooldown.as_millis() as u64,
            trips: self.trips(),
        }
    }
}

/// Frees the half-open probe slot if the probe future is dropped mid-flight.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.probe_in_flight = false;
            tracing::debug!(operation_class = %self.breaker.operation_class, "Probe call cancelled");
        }
    }
}

/// One breaker per operation class, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<OperationClass, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `class`, created on first use.
    pub fn breaker(&self, class: &OperationClass) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(class.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    class.clone(),
                    self.config.failure_threshold,
                    self.config.cooldown(),
                ))
            })
            .value()
            .clone()
    }

    /// Run `f` under the breaker of `class`.
    pub async fn call_with_breaker<F, Fut, T>(&self, class: &OperationClass, f: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let breaker = self.breaker(class);
        breaker.call(f).await
    }

    /// True if the breaker for `class` exists and is currently rejecting calls.
    pub fn is_open(&self, class: &OperationClass) -> bool {
        self.breakers
            .get(class)
            .map(|b| b.value().clone())
            .map(|b| b.is_blocking())
            .unwrap_or(false)
    }

    /// Total trips across all classes.
    pub fn trips(&self) -> u64 {
        self.breakers.iter().map(|b| b.value().trips()).sum()
    }

    /// Total trips of the given classes only.
    pub fn trips_for(&self, classes: &[OperationClass]) -> u64 {
        classes
            .iter()
            .filter_map(|class| self.breakers.get(class).map(|b| b.value().trips()))
            .sum()
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.iter().map(|b| b.value().clone()).collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.operation_class.cmp(&b.operation_class));
        snapshots
    }
}
