use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use super::concept::SlotValues;
use super::pattern::substitute;
use crate::error::TransformError;
use crate::models::{
    strip_semantic_tag, Concept, ConceptDescription, ConceptMini, ConceptTemplate, DescriptionType,
    LexicalTemplate,
};

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Rewrites the concept's FSN and synonyms from the outline's term templates.
pub(crate) fn transform_descriptions(
    concept: &mut Concept,
    destination: &ConceptTemplate,
    resolved: &HashMap<String, ConceptMini>,
    values: &SlotValues,
    inactivation_reason: Option<&str>,
) -> Result<(), TransformError> {
    let outline = &destination.concept_outline;
    if outline.descriptions.is_empty() {
        return Ok(());
    }
    let module_id = outline
        .module_id
        .clone()
        .or_else(|| concept.module_id.clone());

    let mut desired = Vec::with_capacity(outline.descriptions.len());
    for description in &outline.descriptions {
        let term = substitute(&description.term_template, |name, at_start| {
            term_for_slot(&concept.concept_id, name, at_start, destination, resolved, values)
        })?;
        let mut wanted = ConceptDescription::new(description.description_type, term);
        wanted.lang = description.lang.clone();
        wanted.acceptability_map = description.acceptability_map.clone();
        wanted.case_significance = description.case_significance;
        wanted.module_id = module_id.clone();
        desired.push(wanted);
    }

    reconcile(concept, desired, inactivation_reason);
    Ok(())
}

fn term_for_slot(
    concept_id: &str,
    name: &str,
    at_start: bool,
    destination: &ConceptTemplate,
    resolved: &HashMap<String, ConceptMini>,
    values: &SlotValues,
) -> Result<String, TransformError> {
    if let Some(captured) = values.terms.get(name) {
        return Ok(captured.clone());
    }

    let unresolved = || TransformError::UnresolvedTerm {
        concept_id: concept_id.to_string(),
        slot: name.to_string(),
    };
    let term = match destination.lexical_template(name) {
        Some(lexical) => {
            let slot_concept = resolved.get(&lexical.take_fsn_from_slot).ok_or_else(unresolved)?;
            let term = slot_term(slot_concept, values).ok_or_else(unresolved)?;
            remove_parts(&term, lexical)
        }
        None => {
            let slot_concept = resolved.get(name).ok_or_else(unresolved)?;
            slot_term(slot_concept, values).ok_or_else(unresolved)?
        }
    };

    if term.is_empty() {
        return Err(unresolved());
    }
    Ok(if at_start { term } else { lower_first(&term) })
}

/// FSN of the slot concept without its semantic tag.
fn slot_term(slot_concept: &ConceptMini, values: &SlotValues) -> Option<String> {
    values
        .fsns
        .get(&slot_concept.concept_id)
        .map(|fsn| strip_semantic_tag(fsn))
        .or_else(|| slot_concept.slot_term())
}

fn remove_parts(term: &str, lexical: &LexicalTemplate) -> String {
    let mut result = term.to_string();
    for part in &lexical.remove_parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let matcher = RegexBuilder::new(&regex::escape(part))
            .case_insensitive(true)
            .build();
        if let Ok(matcher) = matcher {
            result = matcher.replace_all(&result, "").into_owned();
        }
    }
    WHITESPACE_RE.replace_all(&result, " ").trim().to_string()
}

/// Lowercases the first letter unless the term starts with an acronym.
fn lower_first(term: &str) -> String {
    let mut chars = term.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if first.is_uppercase() && !second.is_uppercase() => {
            first.to_lowercase().chain(term[first.len_utf8()..].chars()).collect()
        }
        (Some(first), None) if first.is_uppercase() => first.to_lowercase().collect(),
        _ => term.to_string(),
    }
}

fn same_description(a: &ConceptDescription, b: &ConceptDescription) -> bool {
    a.description_type == b.description_type && a.term == b.term && a.lang == b.lang
}

/// Keeps matching FSNs and synonyms with the outline's acceptability,
/// retires the rest and appends what is new.
fn reconcile(
    concept: &mut Concept,
    desired: Vec<ConceptDescription>,
    inactivation_reason: Option<&str>,
) {
    let existing = std::mem::take(&mut concept.descriptions);
    let candidate = |d: &ConceptDescription| {
        d.active
            && matches!(
                d.description_type,
                DescriptionType::Fsn | DescriptionType::Synonym
            )
    };

    let mut matched: Vec<Option<BTreeMap<_, _>>> = vec![None; existing.len()];
    let mut additions = Vec::new();
    for wanted in desired {
        let found = (0..existing.len()).find(|&i| {
            matched[i].is_none() && candidate(&existing[i]) && same_description(&existing[i], &wanted)
        });
        match found {
            Some(i) => matched[i] = Some(wanted.acceptability_map),
            None => additions.push(wanted),
        }
    }

    for (mut description, acceptability) in existing.into_iter().zip(matched) {
        if let Some(acceptability) = acceptability {
            if description.acceptability_map != acceptability {
                description.acceptability_map = acceptability;
                description.effective_time = None;
            }
            concept.descriptions.push(description);
        } else if !candidate(&description) {
            concept.descriptions.push(description);
        } else if inactivation_reason.is_some() || description.is_released() {
            description.active = false;
            description.effective_time = None;
            description.acceptability_map.clear();
            description.inactivation_indicator = inactivation_reason.map(str::to_string);
            concept.descriptions.push(description);
        }
    }
    concept.descriptions.extend(additions);
}
