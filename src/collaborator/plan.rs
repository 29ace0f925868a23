//! Deck plans produced by the template collaborator, and their conversion
//! into batch jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collaborator::result::{Collaborator, CollaboratorResult};
use crate::remote::Mutation;
use crate::resilience::OperationClass;
use crate::scheduler::{BatchJob, WorkItem};

/// Placeholder replacements for one remote document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckPlan {
    pub document_id: String,
    /// Placeholder token → replacement text.
    #[serde(default)]
    pub text: BTreeMap<String, String>,
    /// Placeholder token → image URL.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

impl DeckPlan {
    /// The text-replace job followed by the image-replace job.
    ///
    /// Every item targets the plan's document, so items of one plan are
    /// serialized by the resource lock.
    pub fn to_jobs(&self, requests_per_item: usize) -> Vec<BatchJob> {
        let text = self
            .text
            .iter()
            .map(|(token, text)| Mutation::replace_text(token.as_str(), text.as_str()))
            .collect();
        let images = self
            .images
            .iter()
            .map(|(token, url)| Mutation::replace_image(token.as_str(), url.as_str()))
            .collect();

        vec![
            self.job(OperationClass::text_replace(), text, requests_per_item),
            self.job(OperationClass::image_replace(), images, requests_per_item),
        ]
    }

    fn job(&self, class: OperationClass, mutations: Vec<Mutation>, requests_per_item: usize) -> BatchJob {
        let items = mutations
            .chunks(requests_per_item.max(1))
            .map(|chunk| WorkItem::new(self.document_id.as_str(), class.clone(), chunk.to_vec()))
            .collect();
        BatchJob::new(class.as_str(), items)
    }
}

/// Reads a serialized `CollaboratorResult<DeckPlan>` from disk.
#[derive(Debug, Clone)]
pub struct PlanFile {
    path: PathBuf,
}

impl PlanFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Collaborator for PlanFile {
    type Request = ();
    type Output = DeckPlan;

    async fn invoke(&self, _request: ()) -> CollaboratorResult<DeckPlan> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                return CollaboratorResult::failure("io", format!("failed to read {}: {}", self.path.display(), e));
            }
        };
        match serde_json::from_str(&content) {
            Ok(result) => result,
            Err(e) => CollaboratorResult::failure("parse", format!("invalid plan {}: {}", self.path.display(), e)),
        }
    }
}
