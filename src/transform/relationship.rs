use std::collections::HashMap;

use crate::error::TransformError;
use crate::models::{Concept, ConceptMini, ConceptOutline, ConceptRelationship, Relationship};

/// Rewrites the concept's stated relationships to the outline.
///
/// Returns every slot value in play, back-references included.
pub(crate) fn transform_relationships(
    concept: &mut Concept,
    outline: &ConceptOutline,
    slot_values: &HashMap<String, ConceptMini>,
    concept_id_map: &HashMap<String, ConceptMini>,
    inactivation_reason: Option<&str>,
) -> Result<HashMap<String, ConceptMini>, TransformError> {
    let mut resolved = slot_values.clone();
    let module_id = outline
        .module_id
        .clone()
        .or_else(|| concept.module_id.clone());

    let mut desired = Vec::with_capacity(outline.relationships.len());
    for relationship in &outline.relationships {
        let type_ = lookup(concept_id_map, &relationship.type_.concept_id)?;
        let Some(target) = resolve_target(&concept.concept_id, relationship, &mut resolved, concept_id_map)?
        else {
            continue;
        };
        let mut wanted = ConceptRelationship::stated(relationship.group_id, type_, target);
        wanted.characteristic_type = relationship.characteristic_type.clone();
        wanted.module_id = module_id.clone();
        desired.push(wanted);
    }

    reconcile(concept, desired, inactivation_reason);
    Ok(resolved)
}

/// `Ok(None)` when an optional slot has no value.
fn resolve_target(
    concept_id: &str,
    relationship: &Relationship,
    resolved: &mut HashMap<String, ConceptMini>,
    concept_id_map: &HashMap<String, ConceptMini>,
) -> Result<Option<ConceptMini>, TransformError> {
    if let Some(slot) = &relationship.target_slot {
        let by_name = slot.slot_name.as_ref().and_then(|name| resolved.get(name));
        let by_reference = slot
            .slot_reference
            .as_ref()
            .and_then(|reference| resolved.get(reference));
        let value = by_name.or(by_reference).cloned();

        return match value {
            Some(value) => {
                if let Some(name) = &slot.slot_name {
                    resolved.entry(name.clone()).or_insert_with(|| value.clone());
                }
                Ok(Some(value))
            }
            None if relationship.is_optional() => Ok(None),
            None => Err(TransformError::UnresolvedSlot {
                concept_id: concept_id.to_string(),
                slot: slot.label(),
            }),
        };
    }

    match &relationship.target {
        Some(target) => lookup(concept_id_map, &target.concept_id).map(Some),
        None => Err(TransformError::MissingTarget {
            type_id: relationship.type_.concept_id.clone(),
        }),
    }
}

fn lookup(
    concept_id_map: &HashMap<String, ConceptMini>,
    concept_id: &str,
) -> Result<ConceptMini, TransformError> {
    concept_id_map
        .get(concept_id)
        .cloned()
        .ok_or_else(|| TransformError::UnknownConcept {
            target: concept_id.to_string(),
        })
}

fn same_relationship(a: &ConceptRelationship, b: &ConceptRelationship) -> bool {
    a.type_.concept_id == b.type_.concept_id
        && a.target.concept_id == b.target.concept_id
        && a.group_id == b.group_id
}

/// Keeps matching stated relationships, retires the rest and appends what
/// is new. Inferred and inactive relationships are left alone.
fn reconcile(
    concept: &mut Concept,
    desired: Vec<ConceptRelationship>,
    inactivation_reason: Option<&str>,
) {
    let existing = std::mem::take(&mut concept.relationships);
    let candidate = |r: &ConceptRelationship| r.active && r.is_stated();

    let mut kept = vec![false; existing.len()];
    let mut additions = Vec::new();
    for wanted in desired {
        let found = (0..existing.len())
            .find(|&i| !kept[i] && candidate(&existing[i]) && same_relationship(&existing[i], &wanted));
        match found {
            Some(i) => kept[i] = true,
            None => additions.push(wanted),
        }
    }

    for (mut relationship, kept) in existing.into_iter().zip(kept) {
        if kept || !candidate(&relationship) {
            concept.relationships.push(relationship);
        } else if inactivation_reason.is_some() || relationship.is_released() {
            relationship.active = false;
            relationship.effective_time = None;
            concept.relationships.push(relationship);
        } else {
            tracing::debug!(
                concept_id = %concept.concept_id,
                type_id = %relationship.type_.concept_id,
                "Dropping unreleased relationship"
            );
        }
    }
    concept.relationships.extend(additions);
}
