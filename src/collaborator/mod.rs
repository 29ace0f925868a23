//! Boundary with the external pipeline steps.
//!
//! Collaborators report `CollaboratorResult` values instead of failing; the
//! template collaborator's `DeckPlan` becomes one text-replace and one
//! image-replace batch job.

pub mod plan;
pub mod result;

pub use plan::{DeckPlan, PlanFile};
pub use result::{Collaborator, CollaboratorError, CollaboratorResult};
