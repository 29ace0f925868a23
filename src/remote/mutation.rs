//! Document mutations carried by work items.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// How a placeholder image shape is filled.
pub const IMAGE_REPLACE_METHOD: &str = "CENTER_INSIDE";

/// One replacement applied to the remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Replace every occurrence of `token` with `text`.
    ReplaceText {
        token: String,
        text: String,
        /// Restrict to these slides; empty means the whole document.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        page_ids: Vec<String>,
    },
    /// Replace every shape containing `token` with the image at `image_url`.
    ReplaceImage {
        token: String,
        image_url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        page_ids: Vec<String>,
    },
}

impl Mutation {
    pub fn replace_text(token: impl Into<String>, text: impl Into<String>) -> Self {
        Mutation::ReplaceText {
            token: token.into(),
            text: text.into(),
            page_ids: Vec::new(),
        }
    }

    pub fn replace_image(token: impl Into<String>, image_url: impl Into<String>) -> Self {
        Mutation::ReplaceImage {
            token: token.into(),
            image_url: image_url.into(),
            page_ids: Vec::new(),
        }
    }

    /// The placeholder token this mutation targets.
    pub fn token(&self) -> &str {
        match self {
            Mutation::ReplaceText { token, .. } | Mutation::ReplaceImage { token, .. } => token,
        }
    }

    /// Render as a batch-update request entry.
    pub fn to_request(&self) -> Value {
        match self {
            Mutation::ReplaceText { token, text, page_ids } => {
                let mut request = json!({
                    "replaceAllText": {
                        "containsText": { "text": token, "matchCase": false },
                        "replaceText": text,
                    }
                });
                if !page_ids.is_empty() {
                    request["replaceAllText"]["pageObjectIds"] = json!(page_ids);
                }
                request
            }
            Mutation::ReplaceImage { token, image_url, page_ids } => {
                let mut request = json!({
                    "replaceAllShapesWithImage": {
                        "containsText": { "text": token, "matchCase": false },
                        "imageUrl": image_url,
                        "imageReplaceMethod": IMAGE_REPLACE_METHOD,
                    }
                });
                if !page_ids.is_empty() {
                    request["replaceAllShapesWithImage"]["pageObjectIds"] = json!(page_ids);
                }
                request
            }
        }
    }
}
