//! Template transformation: re-authoring existing concepts so they conform
//! to a destination template.
//!
//! Two modes are supported (see [`TransformMode`](crate::models::TransformMode)):
//! slot values are carried over either by slot name from a source template
//! the concepts already follow, or by attribute type straight from the
//! concepts' relationships.

mod concept;
mod description;
mod input;
pub mod pattern;
mod pool;
mod relationship;
mod service;
mod validate;

pub use concept::{transform_concept, SlotValues};
pub use input::{literal_concept_ids, TransformationInputData};
pub use pool::{WorkerPool, WorkerPoolError};
pub use service::{partition, TransformService, TransformationHandle};
pub use validate::{validate, validate_term_slots};
