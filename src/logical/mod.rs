//! Logical templates: the constraint language describing the relationships a
//! templated concept must have.
//!
//! ```text
//! 71388002 |Procedure|:
//!     [[~1..1]] {
//!         260686004 |Method| = 312251004 |Computed tomography imaging action|,
//!         [[~1..1]] 405813007 |Procedure site - Direct| = [[+id(<< 442083009 |Anatomical or acquired body structure|) @procSite]]
//!     }
//! ```

mod parser;
mod resolver;

pub use parser::{parse_template, ParseError};
pub use resolver::AttributeSlotIndex;

use serde::{Deserialize, Serialize};

/// A parsed logical template.
///
/// Group ids are fixed at parse time: ungrouped attributes are group 0 and
/// groups are numbered from 1 in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalTemplate {
    pub focus_concepts: Vec<ConceptRef>,
    pub attribute_groups: Vec<AttributeGroup>,
    pub ungrouped_attributes: Vec<Attribute>,
}

impl LogicalTemplate {
    /// Every attribute paired with its group id, ungrouped attributes first.
    pub fn attributes(&self) -> impl Iterator<Item = (u32, &Attribute)> {
        self.ungrouped_attributes
            .iter()
            .map(|attribute| (0, attribute))
            .chain(self.attribute_groups.iter().flat_map(|group| {
                group
                    .attributes
                    .iter()
                    .map(move |attribute| (group.group_id, attribute))
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub group_id: u32,
    pub cardinality: Option<Cardinality>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_type: ConceptRef,
    pub cardinality: Option<Cardinality>,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn slot(&self) -> Option<&Slot> {
        match &self.value {
            AttributeValue::Slot(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn slot_name(&self) -> Option<&str> {
        self.slot().and_then(|slot| slot.name.as_deref())
    }
}

/// `id |term|`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptRef {
    pub concept_id: String,
    pub term: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Concept(ConceptRef),
    /// Nested expression, kept verbatim.
    Expression(String),
    Slot(Slot),
}

/// `[[+id(<constraint>) @name $reference]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: Option<String>,
    /// Constraint expression, passed through uninterpreted.
    pub allowable_range_ecl: Option<String>,
    /// Slot whose resolved value this slot reuses.
    pub slot_reference: Option<String>,
}

/// `[[~min..max]]`; `max` is `None` for `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    pub max: Option<u32>,
}
