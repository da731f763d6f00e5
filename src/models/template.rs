use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::concept::ConceptMini;
use crate::logical::Cardinality;

/// Concept id of the `116680003 |Is a|` attribute.
pub const IS_A: &str = "116680003";
pub const STATED_RELATIONSHIP: &str = "STATED_RELATIONSHIP";
pub const INFERRED_RELATIONSHIP: &str = "INFERRED_RELATIONSHIP";
pub const US_ENGLISH: &str = "900000000000509007";
pub const GB_ENGLISH: &str = "900000000000508004";

/// A named, versioned authoring template.
///
/// The logical template text is the source of truth for the outline's
/// relationships: every save re-derives them, together with the focus
/// concept and the descriptions' initial terms.
///
/// Templates are **append-only**: an update stores a new version and leaves
/// earlier versions untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptTemplate {
    pub name: String,
    pub version: u32,
    /// ECL describing the concepts this template may be applied to.
    pub domain: Option<String>,
    /// First focus concept of the logical template.
    pub focus_concept: Option<String>,
    pub logical_template: String,
    #[serde(default)]
    pub lexical_templates: Vec<LexicalTemplate>,
    #[serde(default)]
    pub concept_outline: ConceptOutline,
    /// Free-text slots that may appear in term templates without a backing
    /// logical slot.
    #[serde(default)]
    pub additional_slots: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConceptTemplate {
    pub fn lexical_template(&self, name: &str) -> Option<&LexicalTemplate> {
        self.lexical_templates.iter().find(|l| l.name == name)
    }

    /// Term templates of the outline descriptions of the given type.
    pub fn term_templates(&self, description_type: DescriptionType) -> Vec<&str> {
        self.concept_outline
            .descriptions
            .iter()
            .filter(|d| d.description_type == description_type)
            .map(|d| d.term_template.as_str())
            .collect()
    }
}

/// Input for creating or updating a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateInput {
    pub domain: Option<String>,
    pub logical_template: String,
    #[serde(default)]
    pub lexical_templates: Vec<LexicalTemplate>,
    #[serde(default)]
    pub concept_outline: ConceptOutline,
    #[serde(default)]
    pub additional_slots: Vec<String>,
}

/// Rule for deriving description text from the concept resolved for a slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LexicalTemplate {
    /// Placeholder name used as `$name$` in term templates.
    pub name: String,
    /// Shown as `[display_name]` in the outline's initial terms.
    pub display_name: String,
    /// Logical slot whose resolved concept supplies the term.
    pub take_fsn_from_slot: String,
    /// Parts removed (case-insensitively) from the slot concept's term.
    #[serde(default)]
    pub remove_parts: Vec<String>,
}

impl LexicalTemplate {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        take_fsn_from_slot: impl Into<String>,
        remove_parts: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            take_fsn_from_slot: take_fsn_from_slot.into(),
            remove_parts,
        }
    }
}

/// Target shape of a concept produced by a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConceptOutline {
    #[serde(default)]
    pub definition_status: DefinitionStatus,
    pub module_id: Option<String>,
    #[serde(default)]
    pub descriptions: Vec<Description>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ConceptOutline {
    pub fn new(definition_status: DefinitionStatus) -> Self {
        Self {
            definition_status,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: Description) -> Self {
        self.descriptions.push(description);
        self
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionStatus {
    #[default]
    Primitive,
    FullyDefined,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DescriptionType {
    Fsn,
    Synonym,
    TextDefinition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Acceptability {
    Preferred,
    Acceptable,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseSignificance {
    #[default]
    CaseInsensitive,
    InitialCharacterCaseInsensitive,
    EntireTermCaseSensitive,
}

/// A description in a concept outline. `term_template` may contain `$slot$`
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Description {
    pub description_type: DescriptionType,
    pub term_template: String,
    /// The term template with every placeholder shown as `[display name]`.
    pub initial_term: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_acceptability")]
    pub acceptability_map: BTreeMap<String, Acceptability>,
    #[serde(default)]
    pub case_significance: CaseSignificance,
}

impl Description {
    pub fn new(description_type: DescriptionType, term_template: impl Into<String>) -> Self {
        Self {
            description_type,
            term_template: term_template.into(),
            initial_term: None,
            lang: default_lang(),
            acceptability_map: default_acceptability(),
            case_significance: CaseSignificance::default(),
        }
    }

    pub fn fsn(term_template: impl Into<String>) -> Self {
        Self::new(DescriptionType::Fsn, term_template)
    }

    pub fn synonym(term_template: impl Into<String>) -> Self {
        Self::new(DescriptionType::Synonym, term_template)
    }

    pub fn acceptable(mut self) -> Self {
        for acceptability in self.acceptability_map.values_mut() {
            *acceptability = Acceptability::Acceptable;
        }
        self
    }
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_acceptability() -> BTreeMap<String, Acceptability> {
    BTreeMap::from([
        (US_ENGLISH.to_string(), Acceptability::Preferred),
        (GB_ENGLISH.to_string(), Acceptability::Preferred),
    ])
}

/// A relationship in a concept outline, derived from one attribute of the
/// logical template. Exactly one of `target` and `target_slot` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub characteristic_type: String,
    pub group_id: u32,
    #[serde(rename = "type")]
    pub type_: ConceptMini,
    pub target: Option<ConceptMini>,
    pub target_slot: Option<SimpleSlot>,
    pub cardinality: Option<Cardinality>,
}

impl Relationship {
    /// Whether the transformation may leave this relationship out when its
    /// slot cannot be resolved.
    pub fn is_optional(&self) -> bool {
        self.cardinality.is_some_and(|c| c.min == 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimpleSlot {
    pub slot_name: Option<String>,
    pub allowable_range_ecl: Option<String>,
    /// Name of another slot whose value this slot reuses.
    pub slot_reference: Option<String>,
}

impl SimpleSlot {
    /// Name used in error messages.
    pub fn label(&self) -> String {
        match (&self.slot_name, &self.slot_reference) {
            (Some(name), _) => name.clone(),
            (None, Some(reference)) => format!("${}", reference),
            (None, None) => "(anonymous)".to_string(),
        }
    }
}
