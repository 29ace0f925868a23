//! Units of work and the jobs that group them.

use std::collections::BTreeSet;
use std::sync::Arc;
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::locks::ResourceKey;
use crate::remote::{Mutation, Transport};
use crate::resilience::OperationClass;

/// What one successful processor call accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemOutput {
    pub objects_processed: usize,
}

/// Applies a work item's mutations through a pooled transport.
///
/// Called once per attempt, with the resource lock held and a connection
/// checked out.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, transport: &dyn Transport, item: &WorkItem) -> OrchestratorResult<ItemOutput>;
}

/// Sends every mutation of the item in one batch-update call.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchUpdateProcessor;

#[async_trait]
impl ItemProcessor for BatchUpdateProcessor {
    async fn process(&self, transport: &dyn Transport, item: &WorkItem) -> OrchestratorResult<ItemOutput> {
        if item.mutations.is_empty() {
            return Ok(ItemOutput::default());
        }
        let requests = item.mutations.iter().map(Mutation::to_request).collect();
        transport.batch_update(item.resource_key.as_str(), requests).await?;
        Ok(ItemOutput {
            objects_processed: item.mutations.len(),
        })
    }
}

/// One schedulable unit: a set of mutations against a single remote document.
#[derive(Clone)]
pub struct WorkItem {
    pub resource_key: ResourceKey,
    pub operation_class: OperationClass,
    pub mutations: Vec<Mutation>,
    pub processor: Arc<dyn ItemProcessor>,
}

impl WorkItem {
    pub fn new(resource_key: impl Into<ResourceKey>, operation_class: OperationClass, mutations: Vec<Mutation>) -> Self {
        Self {
            resource_key: resource_key.into(),
            operation_class,
            mutations,
            processor: Arc::new(BatchUpdateProcessor),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processor = processor;
        self
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("resource_key", &self.resource_key)
            .field("operation_class", &self.operation_class)
            .field("mutations", &self.mutations.len())
            .finish()
    }
}

/// An ordered set of work items run as one operation.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub correlation_id: String,
    pub label: String,
    pub items: Arc<Vec<WorkItem>>,
    /// Overrides the configured concurrency when set.
    pub max_concurrency: Option<usize>,
}

impl BatchJob {
    pub fn new(label: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            label: label.into(),
            items: Arc::new(items),
            max_concurrency: None,
        }
    }

    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct operation classes used by the items, in sorted order.
    pub fn operation_classes(&self) -> Vec<OperationClass> {
        let classes: BTreeSet<OperationClass> = self.items.iter().map(|i| i.operation_class.clone()).collect();
        classes.into_iter().collect()
    }
}

pub fn new_correlation_id() -> String {
    format!("batch-{}", Uuid::new_v4())
}
