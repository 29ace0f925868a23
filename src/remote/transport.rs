//! Transport seam between the orchestrator and the remote document API.

use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value;
use crate::error::OrchestratorResult;

/// A client able to apply batch updates to remote documents.
///
/// Implementations classify their own failures into the orchestrator error
/// taxonomy (transient, transport-level, fatal).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Apply `requests` to `document_id` in one remote call.
    async fn batch_update(&self, document_id: &str, requests: Vec<Value>) -> OrchestratorResult<Value>;
}

/// Creates transports for the connection pool.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> OrchestratorResult<Arc<dyn Transport>>;
}
