//! Deadline enforcement for remote calls.

use std::future::Future;
use std::time::Duration;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Run `fut` with a deadline. Elapsing maps to a transient timeout error.
pub async fn with_deadline<F, T>(deadline: Duration, what: &str, fut: F) -> OrchestratorResult<T>
where
    F: Future<Output = OrchestratorResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::transient(format!(
            "{} timed out after {:?}",
            what, deadline
        ))),
    }
}
