use std::collections::{HashMap, HashSet};

use super::{AttributeValue, LogicalTemplate};
use crate::models::{Concept, ConceptMini};

impl LogicalTemplate {
    /// Names of every named slot.
    pub fn slot_names(&self) -> HashSet<String> {
        self.attributes()
            .filter_map(|(_, attribute)| attribute.slot_name())
            .map(str::to_string)
            .collect()
    }

    /// Attribute type id to the names of the slots it carries.
    pub fn attribute_type_slot_map(&self) -> HashMap<String, HashSet<String>> {
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for (_, attribute) in self.attributes() {
            if let Some(name) = attribute.slot_name() {
                map.entry(attribute.attribute_type.concept_id.clone())
                    .or_default()
                    .insert(name.to_string());
            }
        }
        map
    }

    pub fn attribute_types(&self) -> HashSet<String> {
        self.attributes()
            .map(|(_, attribute)| attribute.attribute_type.concept_id.clone())
            .collect()
    }
}

/// Finds slot values on a live concept by attribute type.
#[derive(Debug, Clone, Default)]
pub struct AttributeSlotIndex {
    /// Attribute type to slot names, in template order.
    slot_map: HashMap<String, Vec<String>>,
    /// Attribute type to the targets the template fixes for it.
    literal_targets: HashMap<String, HashSet<String>>,
}

impl AttributeSlotIndex {
    pub fn from_template(template: &LogicalTemplate) -> Self {
        let mut index = Self::default();
        for (_, attribute) in template.attributes() {
            let type_id = &attribute.attribute_type.concept_id;
            match &attribute.value {
                AttributeValue::Slot(slot) => {
                    if let Some(name) = &slot.name {
                        let names = index.slot_map.entry(type_id.clone()).or_default();
                        if !names.contains(name) {
                            names.push(name.clone());
                        }
                    }
                }
                AttributeValue::Concept(target) => {
                    index
                        .literal_targets
                        .entry(type_id.clone())
                        .or_default()
                        .insert(target.concept_id.clone());
                }
                AttributeValue::Expression(_) => {}
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.slot_map.is_empty()
    }

    /// Slot values read from the concept's active relationships.
    ///
    /// Stated relationships are scanned first and inferred ones only fill
    /// slots still empty. Within a type, slots are filled in template order
    /// by distinct targets; the first matching relationship wins.
    pub fn slot_values(&self, concept: &Concept) -> HashMap<String, ConceptMini> {
        let mut values: HashMap<String, ConceptMini> = HashMap::new();
        let stated = concept.active_relationships().filter(|r| r.is_stated());
        let inferred = concept.active_relationships().filter(|r| !r.is_stated());

        for relationship in stated.chain(inferred) {
            let type_id = relationship.type_.concept_id.as_str();
            let Some(names) = self.slot_map.get(type_id) else {
                continue;
            };
            let target_id = &relationship.target.concept_id;
            let is_literal = self
                .literal_targets
                .get(type_id)
                .is_some_and(|targets| targets.contains(target_id));
            if is_literal {
                continue;
            }
            let already_used = names
                .iter()
                .filter_map(|name| values.get(name))
                .any(|value| &value.concept_id == target_id);
            if already_used {
                continue;
            }
            if let Some(name) = names.iter().find(|name| !values.contains_key(*name)) {
                values.insert(name.clone(), relationship.target.clone());
            }
        }
        values
    }
}
