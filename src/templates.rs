//! Template storage: create, update, load and list concept templates.
//!
//! Every save parses the logical template and re-derives the outline's
//! relationships, the focus concept and the descriptions' initial terms, so
//! a stored template is always consistent with its logical template text.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::ServiceError;
use crate::logical::{parse_template, AttributeValue, LogicalTemplate};
use crate::models::{
    ConceptMini, ConceptTemplate, LexicalTemplate, Relationship, SimpleSlot, TemplateInput, IS_A,
    STATED_RELATIONSHIP,
};
use crate::terminology::{with_deadline, TerminologyClient};
use crate::transform::pattern::substitute;

/// A stored template together with its parsed logical template.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    pub template: ConceptTemplate,
    pub logical: LogicalTemplate,
}

impl ParsedTemplate {
    pub fn parse(template: ConceptTemplate) -> Result<Self, ServiceError> {
        let logical = parse_logical(&template.name, &template.logical_template)?;
        Ok(Self { template, logical })
    }
}

fn parse_logical(name: &str, source: &str) -> Result<LogicalTemplate, ServiceError> {
    parse_template(source).map_err(|source| ServiceError::Parse {
        template: name.to_string(),
        source,
    })
}

#[derive(Clone)]
pub struct TemplateService {
    db: Database,
    client: Arc<dyn TerminologyClient>,
    request_timeout: Duration,
}

impl TemplateService {
    pub fn new(db: Database, client: Arc<dyn TerminologyClient>, request_timeout: Duration) -> Self {
        Self {
            db,
            client,
            request_timeout,
        }
    }

    pub fn create(&self, name: &str, input: TemplateInput) -> Result<ConceptTemplate, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "Template name must not be empty".to_string(),
            ));
        }
        if self.db.get_template(name)?.is_some() {
            return Err(ServiceError::TemplateExists(name.to_string()));
        }

        let template = build_template(name, 1, input, Utc::now())?;
        self.db.insert_template_version(&template)?;
        tracing::info!(template = %name, "Created template");
        Ok(template)
    }

    /// Stores the input as the next version of an existing template.
    pub fn update(&self, name: &str, input: TemplateInput) -> Result<ConceptTemplate, ServiceError> {
        let existing = self.load_or_throw(name)?;
        let template = build_template(name, existing.version + 1, input, existing.created_at)?;
        self.db.insert_template_version(&template)?;
        tracing::info!(template = %name, version = template.version, "Updated template");
        Ok(template)
    }

    pub fn load(&self, name: &str) -> Result<Option<ConceptTemplate>, ServiceError> {
        Ok(self.db.get_template(name)?)
    }

    pub fn load_or_throw(&self, name: &str) -> Result<ConceptTemplate, ServiceError> {
        self.load(name)?
            .ok_or_else(|| ServiceError::TemplateNotFound(name.to_string()))
    }

    /// Templates whose focus concept lies in the given hierarchies on the
    /// branch. Without filters every template is returned.
    pub async fn list_all(
        &self,
        branch: &str,
        ancestors_of: &[String],
        descendants_of: &[String],
    ) -> Result<Vec<ConceptTemplate>, ServiceError> {
        let templates = self.db.get_all_templates()?;
        if ancestors_of.is_empty() && descendants_of.is_empty() {
            return Ok(templates);
        }

        let mut matching = Vec::new();
        for template in templates {
            let Some(focus) = template.focus_concept.as_deref() else {
                continue;
            };
            let ecl = build_filter_ecl(focus, ancestors_of, descendants_of);
            let matches = with_deadline(
                self.request_timeout,
                self.client.ecl_query_has_any_matches(branch, &ecl),
            )
            .await?;
            if matches {
                matching.push(template);
            }
        }
        Ok(matching)
    }
}

/// `(focus) AND (<<a OR >>b ...)`. Repeated ids are kept.
pub fn build_filter_ecl(focus: &str, ancestors_of: &[String], descendants_of: &[String]) -> String {
    let clauses: Vec<String> = ancestors_of
        .iter()
        .map(|id| format!("<<{}", id))
        .chain(descendants_of.iter().map(|id| format!(">>{}", id)))
        .collect();
    format!("({}) AND ({})", focus, clauses.join(" OR "))
}

fn build_template(
    name: &str,
    version: u32,
    input: TemplateInput,
    created_at: DateTime<Utc>,
) -> Result<ConceptTemplate, ServiceError> {
    let logical = parse_logical(name, &input.logical_template)?;

    let mut outline = input.concept_outline;
    outline.relationships = derive_relationships(&logical);
    for description in &mut outline.descriptions {
        description.initial_term = Some(initial_term(
            &description.term_template,
            &input.lexical_templates,
        ));
    }

    Ok(ConceptTemplate {
        name: name.to_string(),
        version,
        domain: input.domain,
        focus_concept: logical.focus_concepts.first().map(|f| f.concept_id.clone()),
        logical_template: input.logical_template,
        lexical_templates: input.lexical_templates,
        concept_outline: outline,
        additional_slots: input.additional_slots,
        created_at,
        updated_at: Utc::now(),
    })
}

/// Outline relationships for a logical template: `Is a` to each focus
/// concept in group 0, then every attribute in its group. Attributes valued
/// by a nested expression have no outline counterpart.
pub fn derive_relationships(logical: &LogicalTemplate) -> Vec<Relationship> {
    let mut relationships: Vec<Relationship> = logical
        .focus_concepts
        .iter()
        .map(|focus| Relationship {
            characteristic_type: STATED_RELATIONSHIP.to_string(),
            group_id: 0,
            type_: ConceptMini::new(IS_A),
            target: Some(ConceptMini::new(&focus.concept_id)),
            target_slot: None,
            cardinality: None,
        })
        .collect();

    for (group_id, attribute) in logical.attributes() {
        let (target, target_slot) = match &attribute.value {
            AttributeValue::Concept(target) => (Some(ConceptMini::new(&target.concept_id)), None),
            AttributeValue::Slot(slot) => (
                None,
                Some(SimpleSlot {
                    slot_name: slot.name.clone(),
                    allowable_range_ecl: slot.allowable_range_ecl.clone(),
                    slot_reference: slot.slot_reference.clone(),
                }),
            ),
            AttributeValue::Expression(_) => continue,
        };
        relationships.push(Relationship {
            characteristic_type: STATED_RELATIONSHIP.to_string(),
            group_id,
            type_: ConceptMini::new(&attribute.attribute_type.concept_id),
            target,
            target_slot,
            cardinality: attribute.cardinality,
        });
    }
    relationships
}

/// The term template with each placeholder shown as `[display name]`.
pub fn initial_term(term_template: &str, lexical_templates: &[LexicalTemplate]) -> String {
    let shown = substitute::<Infallible>(term_template, |name, _| {
        let display = lexical_templates
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.display_name.as_str())
            .unwrap_or(name);
        Ok(format!("[{}]", display))
    });
    match shown {
        Ok(term) => term,
        Err(never) => match never {},
    }
}
