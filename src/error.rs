//! Error taxonomy shared by every orchestration layer.
//!
//! Item-level errors never escape `run_batch`; they are flattened into an
//! [`ItemError`] (kind + message) and carried as data inside results.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a failure, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable: timeouts, connection resets, rate-limit signals.
    Transient,
    /// Non-retryable: malformed request, authorization failure.
    Fatal,
    /// No pooled connection became free within the bounded wait.
    PoolExhausted,
    /// The operation class breaker rejected the call.
    CircuitOpen,
    /// The resource lock could not be acquired within the bounded wait.
    LockTimeout,
    /// The concurrent path itself is unsafe to continue.
    SystemicFailure,
    /// The item never started (batch deadline or systemic abort).
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::SystemicFailure => "systemic_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while executing a single unit of work.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Retryable remote failure. `transport` marks connection-level faults
    /// (reset, secure-channel errors) that count towards a pool reset.
    #[error("transient error: {message}")]
    Transient { message: String, transport: bool },

    /// Remote rejected the request permanently.
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("circuit breaker open for operation class '{0}'")]
    CircuitOpen(String),

    #[error("timed out after {waited:?} waiting for lock on '{key}'")]
    LockTimeout { key: String, waited: Duration },

    #[error("systemic failure: {0}")]
    Systemic(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl OrchestratorError {
    /// Retryable failure that is not connection-level.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into(), transport: false }
    }

    /// Connection-level failure (reset, TLS). Retryable.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into(), transport: true }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::Systemic(_) => ErrorKind::SystemicFailure,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// True for connection-level faults.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transient { transport: true, .. })
    }
}

/// Error as carried inside an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for ItemError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<OrchestratorError> for ItemError {
    fn from(err: OrchestratorError) -> Self {
        Self::from(&err)
    }
}

/// Result alias for orchestration operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
