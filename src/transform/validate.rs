use std::collections::{BTreeSet, HashSet};

use super::pattern::placeholders;
use crate::error::ValidationError;
use crate::models::TransformMode;
use crate::templates::ParsedTemplate;

/// Checks that the destination's slots can be filled from the source.
///
/// Every missing item is reported once, sorted, in a single error.
pub fn validate(
    mode: TransformMode,
    source: &ParsedTemplate,
    destination: &ParsedTemplate,
) -> Result<(), ValidationError> {
    match mode {
        TransformMode::ConceptToConcept => {
            let missing = missing_from(
                destination.logical.slot_names(),
                &source.logical.slot_names(),
            );
            check(missing, |items| {
                format!(
                    "Destination template {} has slot {} that doesn't exist in the source template {}",
                    destination.template.name, items, source.template.name
                )
            })
        }
        TransformMode::TemplateToConcept => {
            validate_term_slots(destination)?;
            let destination_types = destination
                .logical
                .attribute_type_slot_map()
                .into_keys()
                .collect();
            let missing = missing_from(destination_types, &source.logical.attribute_types());
            check(missing, |items| {
                format!(
                    "Destination template {} has slot attribute type {} that doesn't exist in the source template {}",
                    destination.template.name, items, source.template.name
                )
            })
        }
    }
}

/// Every `$placeholder$` in the outline descriptions must name a lexical
/// template, a logical slot or an additional slot.
pub fn validate_term_slots(destination: &ParsedTemplate) -> Result<(), ValidationError> {
    let template = &destination.template;
    let mut known: HashSet<String> = destination.logical.slot_names();
    known.extend(template.lexical_templates.iter().map(|l| l.name.clone()));
    known.extend(template.additional_slots.iter().cloned());

    let used: HashSet<String> = template
        .concept_outline
        .descriptions
        .iter()
        .flat_map(|d| placeholders(&d.term_template))
        .collect();

    check(missing_from(used, &known), |items| {
        format!(
            "Destination template {} has term slot {} that is neither a lexical template nor a slot",
            template.name, items
        )
    })
}

fn missing_from(required: HashSet<String>, available: &HashSet<String>) -> Vec<String> {
    required
        .into_iter()
        .filter(|item| !available.contains(item))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn check(
    missing: Vec<String>,
    message: impl FnOnce(&str) -> String,
) -> Result<(), ValidationError> {
    if missing.is_empty() {
        return Ok(());
    }
    Err(ValidationError {
        message: message(&missing.join(",")),
        missing,
    })
}
