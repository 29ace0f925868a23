//! Wire shape of collaborator outputs.
//!
//! ```json
//! {"ok": true, "value": ...}
//! {"ok": false, "errorKind": "data_unavailable", "message": "..."}
//! ```

use async_trait::async_trait;
use serde::de::{Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error_kind}: {message}")]
pub struct CollaboratorError {
    pub error_kind: String,
    pub message: String,
}

/// Outcome of one collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorResult<T> {
    Ok(T),
    Err(CollaboratorError),
}

impl<T> CollaboratorResult<T> {
    pub fn failure(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        CollaboratorResult::Err(CollaboratorError {
            error_kind: error_kind.into(),
            message: message.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CollaboratorResult::Ok(_))
    }

    pub fn into_result(self) -> Result<T, CollaboratorError> {
        match self {
            CollaboratorResult::Ok(value) => Ok(value),
            CollaboratorResult::Err(e) => Err(e),
        }
    }
}

/// An external step producing input for the orchestrator (data retrieval,
/// chart rendering, template mapping).
#[async_trait]
pub trait Collaborator: Send + Sync {
    type Request: Send;
    type Output: Send;

    async fn invoke(&self, request: Self::Request) -> CollaboratorResult<Self::Output>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRef<'a, T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire<T> {
    ok: bool,
    value: Option<T>,
    error_kind: Option<String>,
    message: Option<String>,
}

impl<T: Serialize> Serialize for CollaboratorResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            CollaboratorResult::Ok(value) => WireRef {
                ok: true,
                value: Some(value),
                error_kind: None,
                message: None,
            },
            CollaboratorResult::Err(e) => WireRef {
                ok: false,
                value: None,
                error_kind: Some(&e.error_kind),
                message: Some(&e.message),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for CollaboratorResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Wire::<T>::deserialize(deserializer)?;
        if wire.ok {
            let value = wire.value.ok_or_else(|| D::Error::missing_field("value"))?;
            Ok(CollaboratorResult::Ok(value))
        } else {
            Ok(CollaboratorResult::Err(CollaboratorError {
                error_kind: wire.error_kind.unwrap_or_else(|| "unknown".to_string()),
                message: wire.message.unwrap_or_default(),
            }))
        }
    }
}
