use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::concept::Concept;

/// Failure key for errors that concern a whole batch rather than one concept.
pub const ERROR_KEY: &str = "Error";

/// Inactivation reason used when a single concept is transformed on demand.
pub const NONCONFORMANCE: &str = "NONCONFORMANCE_TO_EDITORIAL_POLICY";

/// A bulk transformation job.
///
/// The record is created when a request is accepted and is then owned by the
/// orchestrator until the job finishes. Callers poll it by `id`.
///
/// # Lifecycle
/// `Pending` → `Running` → one of `Completed`, `CompletedWithFailure`, `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateTransformation {
    pub id: Uuid,
    pub branch_path: String,
    pub destination_template: String,
    pub transform_request: TemplateTransformRequest,
    pub status: TransformationStatus,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateTransformation {
    pub fn new(
        branch_path: impl Into<String>,
        destination_template: impl Into<String>,
        transform_request: TemplateTransformRequest,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            branch_path: branch_path.into(),
            destination_template: destination_template.into(),
            transform_request,
            status: TransformationStatus::Pending,
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TransformationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Marks the job failed, appending to any earlier error message.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error_msg = Some(match self.error_msg.take() {
            Some(existing) => format!("{}\n{}", existing, message),
            None => message,
        });
        self.set_status(TransformationStatus::Failed);
    }
}

/// What a caller asked to be transformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateTransformRequest {
    #[serde(default)]
    pub mode: TransformMode,
    /// Template the concepts currently conform to.
    pub source_template: Option<String>,
    pub concepts_to_transform: Vec<String>,
    /// When set, components the destination no longer produces are
    /// inactivated with this reason instead of being removed.
    pub inactivation_reason: Option<String>,
}

/// Selects how slot values are carried from the source to the destination.
///
/// - `ConceptToConcept`: values are copied by slot name; the source template's
///   slots must cover the destination's.
/// - `TemplateToConcept`: values are copied by attribute type from the live
///   concept; the source template's attribute types must cover the
///   destination's slot attribute types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    #[default]
    ConceptToConcept,
    TemplateToConcept,
}

impl TransformMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConceptToConcept => "concept_to_concept",
            Self::TemplateToConcept => "template_to_concept",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationStatus {
    Pending,
    Running,
    Completed,
    CompletedWithFailure,
    Failed,
}

impl TransformationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithFailure => "COMPLETED_WITH_FAILURE",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "COMPLETED_WITH_FAILURE" => Some(Self::CompletedWithFailure),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Status of a job whose units have all been collected.
    ///
    /// A job with failures is `CompletedWithFailure` even when nothing was
    /// transformed; only a failed unit makes the whole job `Failed`.
    pub fn from_outcome(unit_failed: bool, result: &TransformationResult) -> Self {
        if unit_failed {
            Self::Failed
        } else if result.failures.is_empty() {
            Self::Completed
        } else {
            Self::CompletedWithFailure
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithFailure | Self::Failed
        )
    }
}

/// Transformed concepts plus failures keyed by concept id (or [`ERROR_KEY`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransformationResult {
    pub concepts: Vec<Concept>,
    pub failures: BTreeMap<String, String>,
}

impl TransformationResult {
    pub fn add_concept(&mut self, concept: Concept) {
        self.concepts.push(concept);
    }

    /// Records a failure. Batch-level messages accumulate under
    /// [`ERROR_KEY`]; a second failure for the same concept replaces the first.
    pub fn add_failure(&mut self, key: impl Into<String>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        match self.failures.get_mut(&key) {
            Some(existing) if key == ERROR_KEY => {
                existing.push('\n');
                existing.push_str(&message);
            }
            _ => {
                self.failures.insert(key, message);
            }
        }
    }

    /// Appends another batch's outcome after this one.
    pub fn merge(&mut self, other: TransformationResult) {
        self.concepts.extend(other.concepts);
        for (key, message) in other.failures {
            self.add_failure(key, message);
        }
    }
}
