//! Domain models.
//!
//! # Core Concepts
//!
//! ## Templates
//!
//! - [`ConceptTemplate`]: Versioned authoring template holding a logical
//!   template, lexical templates and a [`ConceptOutline`].
//! - [`ConceptOutline`]: The shape a concept must have once the template is applied.
//!
//! ## Terminology payloads
//!
//! - [`Concept`], [`ConceptDescription`], [`ConceptRelationship`], [`ConceptMini`]
//!   and [`SimpleConcept`] mirror the terminology service's JSON.
//!
//! ## Transformation jobs
//!
//! - [`TemplateTransformation`]: Job record polled by callers.
//! - [`TransformationResult`]: Transformed concepts and per-item failures.

mod concept;
mod template;
mod transformation;

pub use concept::*;
pub use template::*;
pub use transformation::*;
