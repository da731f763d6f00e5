use std::collections::{BTreeSet, HashMap};

use super::concept::SlotValues;
use super::pattern::{compile_all, slot_term_values, TermPattern};
use crate::error::ServiceError;
use crate::logical::AttributeSlotIndex;
use crate::models::{
    Concept, ConceptMini, ConceptOutline, ConceptTemplate, DescriptionType, TransformMode,
};
use crate::templates::ParsedTemplate;

/// Everything a batch needs that does not depend on the batch. Built once per
/// job and shared by all its units.
#[derive(Debug, Clone)]
pub struct TransformationInputData {
    pub mode: TransformMode,
    pub branch_path: String,
    pub destination: ConceptTemplate,
    /// Patterns over the source template's FSN term templates.
    pub fsn_patterns: Vec<TermPattern>,
    pub synonym_patterns: Vec<TermPattern>,
    /// Slots matched against live concepts: the source template's in
    /// concept-to-concept mode, the destination's otherwise.
    pub slot_index: AttributeSlotIndex,
    /// Literal types and targets of the destination outline.
    pub concept_id_map: HashMap<String, ConceptMini>,
    pub inactivation_reason: Option<String>,
}

impl TransformationInputData {
    pub fn new(
        mode: TransformMode,
        branch_path: impl Into<String>,
        source: Option<&ParsedTemplate>,
        destination: ParsedTemplate,
        concept_id_map: HashMap<String, ConceptMini>,
        inactivation_reason: Option<String>,
    ) -> Result<Self, ServiceError> {
        let (fsn_patterns, synonym_patterns, slot_index) = match (mode, source) {
            (TransformMode::ConceptToConcept, Some(source)) => (
                patterns(&source.template, DescriptionType::Fsn)?,
                patterns(&source.template, DescriptionType::Synonym)?,
                AttributeSlotIndex::from_template(&source.logical),
            ),
            (TransformMode::ConceptToConcept, None) => {
                return Err(ServiceError::InvalidRequest(
                    "A source template is required to transform concept to concept".to_string(),
                ))
            }
            (TransformMode::TemplateToConcept, _) => (
                Vec::new(),
                Vec::new(),
                AttributeSlotIndex::from_template(&destination.logical),
            ),
        };

        Ok(Self {
            mode,
            branch_path: branch_path.into(),
            destination: destination.template,
            fsn_patterns,
            synonym_patterns,
            slot_index,
            concept_id_map,
            inactivation_reason,
        })
    }

    /// Slot values found on the concept itself.
    pub fn slot_values(&self, concept: &Concept) -> SlotValues {
        SlotValues {
            concepts: self.slot_index.slot_values(concept),
            terms: slot_term_values(&self.fsn_patterns, &self.synonym_patterns, concept),
            fsns: HashMap::new(),
        }
    }
}

fn patterns(
    template: &ConceptTemplate,
    description_type: DescriptionType,
) -> Result<Vec<TermPattern>, ServiceError> {
    compile_all(template.term_templates(description_type)).map_err(|e| {
        ServiceError::InvalidRequest(format!(
            "Invalid term template in {}: {}",
            template.name, e
        ))
    })
}

/// Ids of every literal relationship type and target in the outline, sorted
/// and without duplicates.
pub fn literal_concept_ids(outline: &ConceptOutline) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for relationship in &outline.relationships {
        ids.insert(relationship.type_.concept_id.clone());
        if let Some(target) = &relationship.target {
            ids.insert(target.concept_id.clone());
        }
    }
    ids.into_iter().collect()
}
