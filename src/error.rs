//! Error types shared by the template and transformation services.

use thiserror::Error;

use crate::logical::ParseError;
use crate::terminology::TerminologyError;

/// Errors surfaced by [`TemplateService`](crate::templates::TemplateService)
/// and [`TransformService`](crate::transform::TransformService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to parse logical template of {template}: {source}")]
    Parse {
        template: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Terminology service error: {0}")]
    Remote(#[from] TerminologyError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template already exists: {0}")]
    TemplateExists(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// A destination template asks for slots the source cannot supply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    /// Sorted, without duplicates.
    pub missing: Vec<String>,
}

/// Failure to transform one concept.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("No value for slot {slot} on concept {concept_id}")]
    UnresolvedSlot { concept_id: String, slot: String },

    #[error("Concept {target} is not available on the branch")]
    UnknownConcept { target: String },

    #[error("Outline relationship of type {type_id} has neither a target nor a slot")]
    MissingTarget { type_id: String },

    #[error("Failed to resolve term slot {slot} for concept {concept_id}")]
    UnresolvedTerm { concept_id: String, slot: String },

    #[error("Failed to load slot concepts for concept {concept_id}: {source}")]
    SlotConcepts {
        concept_id: String,
        #[source]
        source: TerminologyError,
    },
}
