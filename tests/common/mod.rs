#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use concept_templates::config::Config;
use concept_templates::db::Database;
use concept_templates::models::*;
use concept_templates::terminology::{ConceptQuery, TerminologyClient, TerminologyError};
use concept_templates::transform::TransformService;

// ============================================================
// Fake terminology service
// ============================================================

/// In-memory terminology service. A search that asks for a poisoned id fails
/// as a whole, the way a transport error would.
#[derive(Default)]
pub struct FakeTerminology {
    concepts: Mutex<HashMap<String, Concept>>,
    simple: Mutex<HashMap<String, SimpleConcept>>,
    poisoned: Mutex<HashSet<String>>,
    searches: Mutex<Vec<Vec<String>>>,
    ecl: Mutex<Vec<String>>,
    matching_ecl: Mutex<HashSet<String>>,
    stalled_ecl: Mutex<bool>,
}

impl FakeTerminology {
    pub fn new() -> Self {
        let fake = Self::default();
        for (id, fsn) in [
            (IS_A, "Is a (attribute)"),
            ("71388002", "Procedure (procedure)"),
            ("260686004", "Method (attribute)"),
            ("312251004", "Computed tomography imaging action (qualifier value)"),
            ("405813007", "Procedure site - Direct (attribute)"),
            ("363703001", "Has intent (attribute)"),
            ("429892002", "Guidance intent (qualifier value)"),
        ] {
            fake.add_simple(id, fsn);
        }
        fake
    }

    pub fn add_concept(&self, concept: Concept) {
        self.concepts
            .lock()
            .unwrap()
            .insert(concept.concept_id.clone(), concept);
    }

    pub fn add_simple(&self, id: &str, fsn: &str) {
        self.simple.lock().unwrap().insert(
            id.to_string(),
            SimpleConcept {
                id: id.to_string(),
                active: true,
                fsn: Some(fsn.to_string()),
                pt: None,
                module_id: None,
                definition_status: None,
            },
        );
    }

    pub fn poison(&self, id: &str) {
        self.poisoned.lock().unwrap().insert(id.to_string());
    }

    /// Expressions for which `ecl_query_has_any_matches` answers true.
    pub fn match_ecl(&self, expression: &str) {
        self.matching_ecl
            .lock()
            .unwrap()
            .insert(expression.to_string());
    }

    /// ECL calls never answer.
    pub fn stall_ecl(&self) {
        *self.stalled_ecl.lock().unwrap() = true;
    }

    pub fn searches(&self) -> Vec<Vec<String>> {
        self.searches.lock().unwrap().clone()
    }

    pub fn ecl_calls(&self) -> Vec<String> {
        self.ecl.lock().unwrap().clone()
    }
}

#[async_trait]
impl TerminologyClient for FakeTerminology {
    async fn search_concepts(
        &self,
        _branch: &str,
        concept_ids: &[String],
    ) -> Result<Vec<Concept>, TerminologyError> {
        self.searches.lock().unwrap().push(concept_ids.to_vec());
        let poisoned = self.poisoned.lock().unwrap();
        if let Some(id) = concept_ids.iter().find(|id| poisoned.contains(*id)) {
            return Err(TerminologyError::Server(format!("connection reset while loading {}", id)));
        }
        let concepts = self.concepts.lock().unwrap();
        Ok(concept_ids
            .iter()
            .filter_map(|id| concepts.get(id).cloned())
            .collect())
    }

    async fn get_concepts(
        &self,
        _branch: &str,
        query: &ConceptQuery,
    ) -> Result<Vec<SimpleConcept>, TerminologyError> {
        let simple = self.simple.lock().unwrap();
        Ok(match &query.concept_ids {
            Some(ids) => ids.iter().filter_map(|id| simple.get(id).cloned()).collect(),
            None => simple.values().cloned().collect(),
        })
    }

    async fn ecl_query(
        &self,
        _branch: &str,
        expression: &str,
        _limit: usize,
    ) -> Result<HashSet<String>, TerminologyError> {
        self.ecl.lock().unwrap().push(expression.to_string());
        Ok(HashSet::new())
    }

    async fn ecl_query_has_any_matches(
        &self,
        _branch: &str,
        expression: &str,
    ) -> Result<bool, TerminologyError> {
        self.ecl.lock().unwrap().push(expression.to_string());
        let stalled = *self.stalled_ecl.lock().unwrap();
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.matching_ecl.lock().unwrap().contains(expression))
    }
}

// ============================================================
// Wiring
// ============================================================

pub fn setup_db() -> Database {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");
    db
}

pub fn setup_service(batch_max: usize) -> (Database, Arc<FakeTerminology>, TransformService) {
    setup_service_with(&Config::new(batch_max))
}

pub fn setup_service_with(config: &Config) -> (Database, Arc<FakeTerminology>, TransformService) {
    let db = setup_db();
    let fake = Arc::new(FakeTerminology::new());
    let service = TransformService::new(db.clone(), fake.clone(), config);
    (db, fake, service)
}

// ============================================================
// Templates
// ============================================================

pub const CT_GUIDED: &str = "CT Guided Procedure of X";
pub const CT_OF_X: &str = "CT of X";

pub const CT_GUIDED_LOGICAL: &str = "71388002 |Procedure|:
\t[[~1..1]] {
\t\t260686004 |Method| = 312251004 |Computed tomography imaging action|,
\t\t[[~1..1]] 405813007 |Procedure site - Direct| = [[+id(<< 442083009 |Anatomical or acquired body structure|) @procSite]],
\t\t363703001 |Has intent| = 429892002 |Guidance intent|
\t},
\t{
\t\t260686004 |Method| = [[+id (<< 129264002 |Action|) @action]],
\t\t[[~1..1]] 405813007 |Procedure site - Direct| = [[+id $procSite]]
\t}
";

pub const CT_OF_X_LOGICAL: &str = "71388002 |Procedure|:
\t[[~1..1]] {
\t\t260686004 |Method| = 312251004 |Computed tomography imaging action|,
\t\t[[~1..1]] 405813007 |Procedure site - Direct| = [[+id(<< 442083009 |Anatomical or acquired body structure|) @procSite]]
\t}
";

fn site_term() -> LexicalTemplate {
    LexicalTemplate::new(
        "procSiteTerm",
        "X",
        "procSite",
        vec!["structure of".to_string(), "structure".to_string()],
    )
}

pub fn ct_guided_input() -> TemplateInput {
    TemplateInput {
        domain: Some("<<71388002 |Procedure|".to_string()),
        logical_template: CT_GUIDED_LOGICAL.to_string(),
        lexical_templates: vec![
            site_term(),
            LexicalTemplate::new("actionTerm", "Action", "action", Vec::new()),
        ],
        concept_outline: ConceptOutline::new(DefinitionStatus::FullyDefined).with_description(
            Description::fsn("$actionTerm$ of $procSiteTerm$ using computed tomography guidance (procedure)"),
        ),
        additional_slots: Vec::new(),
    }
}

pub fn ct_of_x_input() -> TemplateInput {
    TemplateInput {
        domain: Some("<<71388002 |Procedure|".to_string()),
        logical_template: CT_OF_X_LOGICAL.to_string(),
        lexical_templates: vec![site_term()],
        concept_outline: ConceptOutline::new(DefinitionStatus::FullyDefined)
            .with_description(Description::fsn("Computed tomography of $procSite$ (procedure)"))
            .with_description(Description::synonym("CT of $procSiteTerm$")),
        additional_slots: Vec::new(),
    }
}

/// Stores both CT templates.
pub fn create_ct_templates(service: &TransformService) {
    service
        .templates()
        .create(CT_GUIDED, ct_guided_input())
        .expect("Failed to create source template");
    service
        .templates()
        .create(CT_OF_X, ct_of_x_input())
        .expect("Failed to create destination template");
}

// ============================================================
// Concepts
// ============================================================

pub const LIVER: &str = "10200004";

fn mini(id: &str, fsn: &str) -> ConceptMini {
    ConceptMini::new(id).with_fsn(fsn)
}

fn released_relationship(group: u32, type_: ConceptMini, target: ConceptMini) -> ConceptRelationship {
    let mut relationship = ConceptRelationship::stated(group, type_, target);
    relationship.effective_time = Some("20170731".to_string());
    relationship
}

fn released_description(description_type: DescriptionType, term: &str) -> ConceptDescription {
    let mut description = ConceptDescription::new(description_type, term);
    description.effective_time = Some("20170731".to_string());
    description.acceptability_map.insert(US_ENGLISH.to_string(), Acceptability::Preferred);
    description
}

/// A released "Biopsy of liver using computed tomography guidance" concept
/// that follows the CT guided template.
pub fn ct_guided_biopsy(concept_id: &str) -> Concept {
    let method = mini("260686004", "Method (attribute)");
    let site = mini("405813007", "Procedure site - Direct (attribute)");
    let liver = mini(LIVER, "Liver structure (body structure)");

    let mut concept = Concept::new(concept_id);
    concept.effective_time = Some("20170731".to_string());
    concept.released = true;
    concept.module_id = Some("900000000000207008".to_string());
    concept.descriptions = vec![
        released_description(
            DescriptionType::Fsn,
            "Biopsy of liver using computed tomography guidance (procedure)",
        ),
        released_description(DescriptionType::Synonym, "CT guided biopsy of liver"),
    ];
    concept.relationships = vec![
        released_relationship(0, mini(IS_A, "Is a (attribute)"), mini("71388002", "Procedure (procedure)")),
        released_relationship(
            1,
            method.clone(),
            mini("312251004", "Computed tomography imaging action (qualifier value)"),
        ),
        released_relationship(1, site.clone(), liver.clone()),
        released_relationship(
            1,
            mini("363703001", "Has intent (attribute)"),
            mini("429892002", "Guidance intent (qualifier value)"),
        ),
        released_relationship(2, method, mini("129314006", "Biopsy - action (qualifier value)")),
        released_relationship(2, site, liver),
    ];
    concept
}

/// The fake with liver structure and the given CT guided concepts loaded.
pub fn load_concepts(fake: &FakeTerminology, ids: &[String]) {
    let mut liver = Concept::new(LIVER);
    liver.descriptions = vec![ConceptDescription::new(
        DescriptionType::Fsn,
        "Liver structure (body structure)",
    )];
    fake.add_concept(liver);
    for id in ids {
        fake.add_concept(ct_guided_biopsy(id));
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn active_terms(concept: &Concept, description_type: DescriptionType) -> Vec<String> {
    concept
        .active_descriptions(description_type)
        .map(|d| d.term.clone())
        .collect()
}

/// `(group, type, target)` of each active stated relationship, sorted.
pub fn active_relationships(concept: &Concept) -> Vec<(u32, String, String)> {
    let mut relationships: Vec<_> = concept
        .active_relationships()
        .map(|r| (r.group_id, r.type_.concept_id.clone(), r.target.concept_id.clone()))
        .collect();
    relationships.sort();
    relationships
}
