use std::collections::HashMap;

use super::description::transform_descriptions;
use super::relationship::transform_relationships;
use crate::error::TransformError;
use crate::models::{Concept, ConceptMini, ConceptTemplate};

/// What is known about a concept's slots before it is transformed.
#[derive(Debug, Clone, Default)]
pub struct SlotValues {
    /// Slot name to the concept filling it.
    pub concepts: HashMap<String, ConceptMini>,
    /// Slot name to text captured from the concept's current terms.
    pub terms: HashMap<String, String>,
    /// Slot concept id to its fully specified name, when loaded separately.
    pub fsns: HashMap<String, String>,
}

/// Applies the destination template's outline to one concept.
///
/// Applying it twice with the same inputs gives the same concept.
pub fn transform_concept(
    mut concept: Concept,
    destination: &ConceptTemplate,
    slot_values: &SlotValues,
    inactivation_reason: Option<&str>,
    concept_id_map: &HashMap<String, ConceptMini>,
) -> Result<Concept, TransformError> {
    let outline = &destination.concept_outline;
    concept.definition_status = outline.definition_status;

    let resolved = transform_relationships(
        &mut concept,
        outline,
        &slot_values.concepts,
        concept_id_map,
        inactivation_reason,
    )?;
    transform_descriptions(
        &mut concept,
        destination,
        &resolved,
        slot_values,
        inactivation_reason,
    )?;

    concept.effective_time = None;
    Ok(concept)
}
