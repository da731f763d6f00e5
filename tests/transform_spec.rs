use std::collections::HashMap;

use chrono::Utc;
use concept_templates::error::TransformError;
use concept_templates::logical::parse_template;
use concept_templates::models::*;
use concept_templates::templates::derive_relationships;
use concept_templates::transform::{literal_concept_ids, transform_concept, SlotValues};
use speculate2::speculate;

fn destination(logical: &str, descriptions: Vec<Description>) -> ConceptTemplate {
    let parsed = parse_template(logical).expect("Failed to parse");
    let mut outline = ConceptOutline::new(DefinitionStatus::FullyDefined);
    outline.relationships = derive_relationships(&parsed);
    outline.descriptions = descriptions;
    ConceptTemplate {
        name: "Destination".to_string(),
        version: 1,
        domain: None,
        focus_concept: Some("71388002".to_string()),
        logical_template: logical.to_string(),
        lexical_templates: Vec::new(),
        concept_outline: outline,
        additional_slots: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn concept_map(ids: &[&str]) -> HashMap<String, ConceptMini> {
    ids.iter()
        .map(|id| (id.to_string(), ConceptMini::new(*id)))
        .collect()
}

fn slots(values: &[(&str, &str, &str)]) -> SlotValues {
    SlotValues {
        concepts: values
            .iter()
            .map(|(name, id, fsn)| (name.to_string(), ConceptMini::new(*id).with_fsn(*fsn)))
            .collect(),
        ..SlotValues::default()
    }
}

fn existing_concept() -> Concept {
    let mut concept = Concept::new("12656001");
    concept.relationships = vec![
        ConceptRelationship::stated(0, ConceptMini::new(IS_A), ConceptMini::new("71388002")),
        ConceptRelationship::stated(0, ConceptMini::new("363703001"), ConceptMini::new("429892002")),
    ];
    concept.descriptions = vec![ConceptDescription::new(DescriptionType::Synonym, "Old term")];
    concept
}

const SITE: &str = "71388002: 405813007 = [[+id @procSite]]";
const OPTIONAL_SITE: &str = "71388002: [[~0..1]] 405813007 = [[+id @procSite]]";

speculate! {
    before {
        let map = concept_map(&[IS_A, "71388002", "405813007"]);
    }

    describe "relationships" {
        it "adds the slot value and drops unreleased leftovers" {
            let template = destination(SITE, Vec::new());
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let concept = transform_concept(existing_concept(), &template, &values, None, &map)
                .expect("Failed to transform");

            let active: Vec<_> = concept
                .relationships
                .iter()
                .map(|r| (r.type_.concept_id.as_str(), r.target.concept_id.as_str(), r.active))
                .collect();
            assert_eq!(
                active,
                vec![(IS_A, "71388002", true), ("405813007", "10200004", true)]
            );
        }

        it "inactivates leftovers when a reason is given" {
            let template = destination(SITE, Vec::new());
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let concept = transform_concept(existing_concept(), &template, &values, Some("OUTDATED"), &map)
                .expect("Failed to transform");

            let intent = concept
                .relationships
                .iter()
                .find(|r| r.type_.concept_id == "363703001")
                .unwrap();
            assert!(!intent.active);
        }

        it "fails when a mandatory slot has no value" {
            let template = destination(SITE, Vec::new());

            let result = transform_concept(existing_concept(), &template, &SlotValues::default(), None, &map);

            assert!(matches!(
                result,
                Err(TransformError::UnresolvedSlot { ref slot, .. }) if slot == "procSite"
            ));
        }

        it "skips an optional slot without a value" {
            let template = destination(OPTIONAL_SITE, Vec::new());

            let concept = transform_concept(existing_concept(), &template, &SlotValues::default(), None, &map)
                .expect("Failed to transform");

            assert_eq!(concept.active_relationships().count(), 1);
        }

        it "fails for a literal the branch does not know" {
            let template = destination(SITE, Vec::new());
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);
            let map = concept_map(&[IS_A, "71388002"]);

            let result = transform_concept(existing_concept(), &template, &values, None, &map);

            assert!(matches!(
                result,
                Err(TransformError::UnknownConcept { ref target }) if target == "405813007"
            ));
        }

        it "resolves a back-reference from the named slot" {
            let template = destination(
                "71388002: { 405813007 = [[+id @procSite]] }, { 405813007 = [[+id $procSite]] }",
                Vec::new(),
            );
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let concept = transform_concept(Concept::new("1"), &template, &values, None, &map)
                .expect("Failed to transform");

            let groups: Vec<u32> = concept
                .relationships
                .iter()
                .filter(|r| r.target.concept_id == "10200004")
                .map(|r| r.group_id)
                .collect();
            assert_eq!(groups, vec![1, 2]);
        }
    }

    describe "descriptions" {
        it "substitutes slot terms and retires old terms" {
            let template = destination(
                SITE,
                vec![
                    Description::fsn("Computed tomography of $procSite$ (procedure)"),
                    Description::synonym("$procSite$ scan").acceptable(),
                ],
            );
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let concept = transform_concept(existing_concept(), &template, &values, Some("OUTDATED"), &map)
                .expect("Failed to transform");

            assert_eq!(
                concept.fsn(),
                Some("Computed tomography of liver structure (procedure)")
            );
            let synonym = concept.active_descriptions(DescriptionType::Synonym).next().unwrap();
            assert_eq!(synonym.term, "Liver structure scan");
            assert!(synonym
                .acceptability_map
                .values()
                .all(|a| *a == Acceptability::Acceptable));

            let old = concept.descriptions.iter().find(|d| d.term == "Old term").unwrap();
            assert!(!old.active);
            assert_eq!(old.inactivation_indicator.as_deref(), Some("OUTDATED"));
        }

        it "prefers terms captured from the current descriptions" {
            let template = destination(SITE, vec![Description::synonym("CT of $site$")]);
            let mut values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);
            values.terms.insert("site".to_string(), "Liver".to_string());

            let concept = transform_concept(existing_concept(), &template, &values, None, &map)
                .expect("Failed to transform");

            let terms: Vec<_> = concept
                .active_descriptions(DescriptionType::Synonym)
                .map(|d| d.term.as_str())
                .collect();
            assert_eq!(terms, vec!["CT of Liver"]);
        }

        it "fails when a term slot cannot be resolved" {
            let template = destination(SITE, vec![Description::synonym("CT of $unknown$")]);
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let result = transform_concept(existing_concept(), &template, &values, None, &map);

            assert!(matches!(result, Err(TransformError::UnresolvedTerm { .. })));
        }

        it "is idempotent" {
            let template = destination(
                SITE,
                vec![Description::fsn("Computed tomography of $procSite$ (procedure)")],
            );
            let values = slots(&[("procSite", "10200004", "Liver structure (body structure)")]);

            let once = transform_concept(existing_concept(), &template, &values, Some("OUTDATED"), &map)
                .expect("Failed to transform");
            let twice = transform_concept(once.clone(), &template, &values, Some("OUTDATED"), &map)
                .expect("Failed to transform");

            assert_eq!(once, twice);
        }
    }

    describe "literal_concept_ids" {
        it "lists types and fixed targets once" {
            let template = destination(
                "71388002: { 260686004 = 312251004, 405813007 = [[+id @procSite]] }, { 260686004 = 312251004 }",
                Vec::new(),
            );
            assert_eq!(
                literal_concept_ids(&template.concept_outline),
                vec![IS_A, "260686004", "312251004", "405813007", "71388002"]
            );
        }
    }
}
