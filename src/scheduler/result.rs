//! Per-item and per-batch outcomes.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ItemError};
use crate::locks::ResourceKey;
use crate::resilience::OperationClass;

/// Which execution path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    Concurrent,
    /// Auto mode gave up on the concurrent path.
    SequentialFallback,
    /// Sequential was forced by configuration or by the caller.
    EmergencySequential,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Concurrent => "concurrent",
            ProcessingMode::SequentialFallback => "sequential-fallback",
            ProcessingMode::EmergencySequential => "emergency-sequential",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Position of the item in its job.
    pub index: usize,
    pub resource_key: ResourceKey,
    pub operation_class: OperationClass,
    pub success: bool,
    pub error: Option<ItemError>,
    pub elapsed_ms: u64,
    pub mode: ProcessingMode,
    pub objects_processed: usize,
    pub api_calls: u32,
    pub attempts: u32,
}

impl OperationResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Aggregate outcome of a batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,
    pub label: String,
    /// True iff every item succeeded.
    pub success: bool,
    pub processing_mode: ProcessingMode,
    /// One entry per work item, in job order.
    pub results: Vec<OperationResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    /// Trips of this batch's operation-class breakers observed while it ran.
    pub breaker_trips: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Set when the concurrent path hit a systemic failure and no fallback ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemic_failure: Option<String>,
}

impl BatchResult {
    pub fn from_results(
        correlation_id: impl Into<String>,
        label: impl Into<String>,
        processing_mode: ProcessingMode,
        results: Vec<OperationResult>,
        elapsed_ms: u64,
        breaker_trips: u64,
    ) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            correlation_id: correlation_id.into(),
            label: label.into(),
            success: failed == 0,
            processing_mode,
            results,
            succeeded,
            failed,
            elapsed_ms,
            breaker_trips,
            fallback_reason: None,
            systemic_failure: None,
        }
    }

    pub fn objects_processed(&self) -> usize {
        self.results.iter().map(|r| r.objects_processed).sum()
    }

    pub fn api_calls(&self) -> u32 {
        self.results.iter().map(|r| r.api_calls).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
