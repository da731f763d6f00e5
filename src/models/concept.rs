use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::template::{
    Acceptability, CaseSignificance, DefinitionStatus, DescriptionType, INFERRED_RELATIONSHIP,
    STATED_RELATIONSHIP,
};

/// A concept as returned by the terminology service's browser endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub concept_id: String,
    #[serde(default = "active")]
    pub active: bool,
    #[serde(default)]
    pub definition_status: DefinitionStatus,
    pub module_id: Option<String>,
    pub effective_time: Option<String>,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub descriptions: Vec<ConceptDescription>,
    #[serde(default)]
    pub relationships: Vec<ConceptRelationship>,
}

impl Concept {
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            active: true,
            definition_status: DefinitionStatus::Primitive,
            module_id: None,
            effective_time: None,
            released: false,
            descriptions: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// The active fully specified name, if any.
    pub fn fsn(&self) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.active && d.description_type == DescriptionType::Fsn)
            .map(|d| d.term.as_str())
    }

    pub fn active_descriptions(
        &self,
        description_type: DescriptionType,
    ) -> impl Iterator<Item = &ConceptDescription> {
        self.descriptions
            .iter()
            .filter(move |d| d.active && d.description_type == description_type)
    }

    pub fn active_relationships(&self) -> impl Iterator<Item = &ConceptRelationship> {
        self.relationships.iter().filter(|r| r.active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptDescription {
    pub description_id: Option<String>,
    #[serde(default = "active")]
    pub active: bool,
    pub term: String,
    #[serde(rename = "type")]
    pub description_type: DescriptionType,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub case_significance: CaseSignificance,
    #[serde(default)]
    pub acceptability_map: BTreeMap<String, Acceptability>,
    pub module_id: Option<String>,
    pub effective_time: Option<String>,
    #[serde(default)]
    pub released: bool,
    pub inactivation_indicator: Option<String>,
}

impl ConceptDescription {
    pub fn new(description_type: DescriptionType, term: impl Into<String>) -> Self {
        Self {
            description_id: None,
            active: true,
            term: term.into(),
            description_type,
            lang: default_lang(),
            case_significance: CaseSignificance::default(),
            acceptability_map: BTreeMap::new(),
            module_id: None,
            effective_time: None,
            released: false,
            inactivation_indicator: None,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released || self.effective_time.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRelationship {
    pub relationship_id: Option<String>,
    #[serde(default = "active")]
    pub active: bool,
    #[serde(default)]
    pub group_id: u32,
    #[serde(rename = "type")]
    pub type_: ConceptMini,
    pub target: ConceptMini,
    #[serde(default = "stated")]
    pub characteristic_type: String,
    pub module_id: Option<String>,
    pub effective_time: Option<String>,
    #[serde(default)]
    pub released: bool,
}

impl ConceptRelationship {
    pub fn stated(group_id: u32, type_: ConceptMini, target: ConceptMini) -> Self {
        Self {
            relationship_id: None,
            active: true,
            group_id,
            type_,
            target,
            characteristic_type: stated(),
            module_id: None,
            effective_time: None,
            released: false,
        }
    }

    pub fn is_stated(&self) -> bool {
        self.characteristic_type != INFERRED_RELATIONSHIP
    }

    pub fn is_released(&self) -> bool {
        self.released || self.effective_time.is_some()
    }
}

/// Minimal concept reference embedded in relationships.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMini {
    pub concept_id: String,
    pub fsn: Option<String>,
    pub pt: Option<String>,
}

impl ConceptMini {
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            fsn: None,
            pt: None,
        }
    }

    pub fn with_fsn(mut self, fsn: impl Into<String>) -> Self {
        self.fsn = Some(fsn.into());
        self
    }

    /// Term used when a slot's value is substituted into a description: the
    /// FSN without its semantic tag, falling back to the preferred term.
    pub fn slot_term(&self) -> Option<String> {
        self.fsn
            .as_deref()
            .map(strip_semantic_tag)
            .or_else(|| self.pt.clone())
    }
}

/// Concept summary returned by the terminology service's concept search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimpleConcept {
    #[serde(alias = "conceptId")]
    pub id: String,
    #[serde(default = "active")]
    pub active: bool,
    pub fsn: Option<String>,
    pub pt: Option<String>,
    pub module_id: Option<String>,
    pub definition_status: Option<DefinitionStatus>,
}

impl SimpleConcept {
    pub fn to_mini(&self) -> ConceptMini {
        ConceptMini {
            concept_id: self.id.clone(),
            fsn: self.fsn.clone(),
            pt: self.pt.clone(),
        }
    }
}

/// Removes a trailing ` (semantic tag)` from a fully specified name.
pub fn strip_semantic_tag(fsn: &str) -> String {
    let trimmed = fsn.trim_end();
    match (trimmed.ends_with(')'), trimmed.rfind(" (")) {
        (true, Some(index)) => trimmed[..index].trim_end().to_string(),
        _ => trimmed.to_string(),
    }
}

fn active() -> bool {
    true
}

fn stated() -> String {
    STATED_RELATIONSHIP.to_string()
}

fn default_lang() -> String {
    "en".to_string()
}
