use std::collections::HashSet;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{cut, map, map_res, opt, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated},
    Finish, IResult,
};
use thiserror::Error;

use super::{
    Attribute, AttributeGroup, AttributeValue, Cardinality, ConceptRef, LogicalTemplate, Slot,
};

type ParseResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// A logical template that does not follow the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the template text.
    pub offset: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    fn from_verbose(source: &str, error: VerboseError<&str>) -> Self {
        let offset = error
            .errors
            .first()
            .map(|(rest, _)| source.len() - rest.len())
            .unwrap_or(0);
        let expected = match error.errors.first() {
            Some((_, VerboseErrorKind::Char(c))) => Some(format!("expected '{}'", c)),
            _ => None,
        };
        let context = error.errors.iter().find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(context) => Some(*context),
            _ => None,
        });

        let message = match (context, expected) {
            (Some(context), Some(expected)) => format!("{}: {}", context, expected),
            (Some(context), None) => context.to_string(),
            (None, Some(expected)) => expected,
            (None, None) => "malformed logical template".to_string(),
        };
        Self::new(message, offset)
    }
}

enum Item {
    Group(Option<Cardinality>, Vec<Attribute>),
    Attribute(Attribute),
}

/// Parse logical template text.
///
/// Slot names must be unique and every `$reference` must name a declared
/// slot. Constraint expressions are captured verbatim.
pub fn parse_template(source: &str) -> Result<LogicalTemplate, ParseError> {
    let (rest, (focus_concepts, items)) = template(source)
        .finish()
        .map_err(|e| ParseError::from_verbose(source, e))?;

    if !rest.trim().is_empty() {
        return Err(ParseError::new(
            "unexpected input after template",
            source.len() - rest.len(),
        ));
    }

    let mut logical = LogicalTemplate {
        focus_concepts,
        attribute_groups: Vec::new(),
        ungrouped_attributes: Vec::new(),
    };
    for item in items {
        match item {
            Item::Group(cardinality, attributes) => {
                let group_id = logical.attribute_groups.len() as u32 + 1;
                logical.attribute_groups.push(AttributeGroup {
                    group_id,
                    cardinality,
                    attributes,
                });
            }
            Item::Attribute(attribute) => logical.ungrouped_attributes.push(attribute),
        }
    }

    check_slots(source, &logical)?;
    Ok(logical)
}

fn check_slots(source: &str, logical: &LogicalTemplate) -> Result<(), ParseError> {
    let mut declared = HashSet::new();
    for (_, attribute) in logical.attributes() {
        if let Some(name) = attribute.slot_name() {
            if !declared.insert(name) {
                return Err(ParseError::new(
                    format!("duplicate slot name '{}'", name),
                    occurrence(source, &format!("@{}", name), 1),
                ));
            }
        }
    }

    for (_, attribute) in logical.attributes() {
        let reference = attribute
            .slot()
            .and_then(|slot| slot.slot_reference.as_deref());
        if let Some(reference) = reference {
            if !declared.contains(reference) {
                return Err(ParseError::new(
                    format!("slot reference '${}' does not name a declared slot", reference),
                    occurrence(source, &format!("${}", reference), 0),
                ));
            }
        }
    }
    Ok(())
}

fn occurrence(source: &str, needle: &str, n: usize) -> usize {
    source
        .match_indices(needle)
        .nth(n)
        .map(|(index, _)| index)
        .unwrap_or(0)
}

fn template(input: &str) -> ParseResult<'_, (Vec<ConceptRef>, Vec<Item>)> {
    let (input, focus) = context(
        "missing focus concept",
        separated_list1(symbol('+'), concept_ref),
    )(input)?;
    let (input, items) = opt(preceded(
        symbol(':'),
        cut(context("malformed refinement", refinement)),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (focus, items.unwrap_or_default())))
}

fn symbol<'a>(c: char) -> impl FnMut(&'a str) -> ParseResult<'a, char> {
    preceded(multispace0, char(c))
}

fn refinement(input: &str) -> ParseResult<'_, Vec<Item>> {
    separated_list1(symbol(','), item)(input)
}

fn item(input: &str) -> ParseResult<'_, Item> {
    alt((
        map(group, |(cardinality, attributes)| {
            Item::Group(cardinality, attributes)
        }),
        map(attribute, Item::Attribute),
    ))(input)
}

fn group(input: &str) -> ParseResult<'_, (Option<Cardinality>, Vec<Attribute>)> {
    let (input, cardinality) = opt(cardinality)(input)?;
    let (input, _) = symbol('{')(input)?;
    let (input, attributes) = cut(context(
        "malformed attribute group",
        terminated(separated_list1(symbol(','), attribute), symbol('}')),
    ))(input)?;
    Ok((input, (cardinality, attributes)))
}

fn attribute(input: &str) -> ParseResult<'_, Attribute> {
    let (input, cardinality) = opt(cardinality)(input)?;
    let (input, attribute_type) = concept_ref(input)?;
    let (input, _) = symbol('=')(input)?;
    let (input, value) = cut(context("malformed attribute value", attribute_value))(input)?;
    Ok((
        input,
        Attribute {
            attribute_type,
            cardinality,
            value,
        },
    ))
}

fn attribute_value(input: &str) -> ParseResult<'_, AttributeValue> {
    preceded(
        multispace0,
        alt((
            map(slot, AttributeValue::Slot),
            map(nested_expression, AttributeValue::Expression),
            map(concept_ref, AttributeValue::Concept),
        )),
    )(input)
}

/// `123456 |Term|` with an optional term.
fn concept_ref(input: &str) -> ParseResult<'_, ConceptRef> {
    let (input, concept_id) = preceded(multispace0, digit1)(input)?;
    let (input, term) = opt(preceded(
        multispace0,
        delimited(char('|'), take_until("|"), char('|')),
    ))(input)?;
    Ok((
        input,
        ConceptRef {
            concept_id: concept_id.to_string(),
            term: term.map(|t: &str| t.trim().to_string()),
        },
    ))
}

/// `[[~min..max]]`
fn cardinality(input: &str) -> ParseResult<'_, Cardinality> {
    let (input, _) = preceded(multispace0, tag("[["))(input)?;
    let (input, _) = symbol('~')(input)?;
    cut(context(
        "malformed cardinality",
        verify(cardinality_bounds, |c: &Cardinality| {
            c.max.map_or(true, |max| max >= c.min)
        }),
    ))(input)
}

fn cardinality_bounds(input: &str) -> ParseResult<'_, Cardinality> {
    let (input, min) = preceded(multispace0, map_res(digit1, |s: &str| s.parse::<u32>()))(input)?;
    let (input, _) = preceded(multispace0, tag(".."))(input)?;
    let (input, max) = preceded(
        multispace0,
        alt((
            map(char('*'), |_| None),
            map(map_res(digit1, |s: &str| s.parse::<u32>()), Some),
        )),
    )(input)?;
    let (input, _) = preceded(multispace0, tag("]]"))(input)?;
    Ok((input, Cardinality { min, max }))
}

/// `[[+id(<constraint>) @name $reference]]`
fn slot(input: &str) -> ParseResult<'_, Slot> {
    let (input, _) = tag("[[")(input)?;
    let (input, _) = symbol('+')(input)?;
    cut(context("malformed slot", slot_body))(input)
}

fn slot_body(input: &str) -> ParseResult<'_, Slot> {
    let (input, _) = preceded(multispace0, tag("id"))(input)?;
    let (input, allowable_range_ecl) = opt(preceded(multispace0, nested_expression))(input)?;
    let (input, name) = opt(preceded(symbol('@'), slot_identifier))(input)?;
    let (input, slot_reference) = opt(preceded(symbol('$'), slot_identifier))(input)?;
    let (input, _) = preceded(multispace0, tag("]]"))(input)?;
    Ok((
        input,
        Slot {
            name: name.map(str::to_string),
            allowable_range_ecl,
            slot_reference: slot_reference.map(str::to_string),
        },
    ))
}

fn slot_identifier(input: &str) -> ParseResult<'_, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

/// Balanced `( ... )`, returning the trimmed inner text. Parentheses inside
/// `|term|` do not count.
fn nested_expression(input: &str) -> ParseResult<'_, String> {
    let (rest, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut in_term = false;
    for (offset, c) in rest.char_indices() {
        match c {
            '|' => in_term = !in_term,
            '(' if !in_term => depth += 1,
            ')' if !in_term => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&rest[offset + 1..], rest[..offset].trim().to_string()));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Failure(VerboseError {
        errors: vec![(
            input,
            VerboseErrorKind::Context("unterminated constraint expression"),
        )],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT_GUIDED: &str = "71388002 |Procedure|:
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

    #[test]
    fn parses_focus_groups_and_slots() {
        let logical = parse_template(CT_GUIDED).unwrap();

        assert_eq!(logical.focus_concepts.len(), 1);
        assert_eq!(logical.focus_concepts[0].concept_id, "71388002");
        assert_eq!(logical.focus_concepts[0].term.as_deref(), Some("Procedure"));
        assert!(logical.ungrouped_attributes.is_empty());
        assert_eq!(logical.attribute_groups.len(), 2);
        assert_eq!(logical.attribute_groups[0].group_id, 1);
        assert_eq!(logical.attribute_groups[1].group_id, 2);
        assert_eq!(
            logical.attribute_groups[0].cardinality,
            Some(Cardinality { min: 1, max: Some(1) })
        );
        assert_eq!(logical.attribute_groups[1].cardinality, None);

        let site = &logical.attribute_groups[0].attributes[1];
        assert_eq!(site.attribute_type.concept_id, "405813007");
        assert_eq!(site.cardinality, Some(Cardinality { min: 1, max: Some(1) }));
        let slot = site.slot().unwrap();
        assert_eq!(slot.name.as_deref(), Some("procSite"));
        assert_eq!(
            slot.allowable_range_ecl.as_deref(),
            Some("<< 442083009 |Anatomical or acquired body structure|")
        );

        let action = logical.attribute_groups[1].attributes[0].slot().unwrap();
        assert_eq!(action.allowable_range_ecl.as_deref(), Some("<< 129264002 |Action|"));

        let back_reference = logical.attribute_groups[1].attributes[1].slot().unwrap();
        assert_eq!(back_reference.name, None);
        assert_eq!(back_reference.slot_reference.as_deref(), Some("procSite"));
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(parse_template(CT_GUIDED), parse_template(CT_GUIDED));
    }

    #[test]
    fn parses_focus_only_template() {
        let logical = parse_template("302509004").unwrap();
        assert_eq!(logical.focus_concepts[0].concept_id, "302509004");
        assert!(logical.attribute_groups.is_empty());
    }

    #[test]
    fn ungrouped_attributes_are_group_zero() {
        let logical = parse_template(
            "363787002 |Observable entity|: 370130000 |Property| = [[+id @property]], [[~0..*]] { 704319004 |Inheres in| = 123037004 |Body structure| }",
        )
        .unwrap();

        let groups: Vec<u32> = logical.attributes().map(|(group, _)| group).collect();
        assert_eq!(groups, vec![0, 1]);
        assert_eq!(
            logical.attribute_groups[0].cardinality,
            Some(Cardinality { min: 0, max: None })
        );
        assert_eq!(
            logical.ungrouped_attributes[0].slot().unwrap().allowable_range_ecl,
            None
        );
    }

    #[test]
    fn parentheses_inside_terms_do_not_close_constraints() {
        let logical = parse_template(
            "71388002: 405813007 = [[+id(<< 442083009 |Body structure (body structure)|) @site]]",
        )
        .unwrap();
        let slot = logical.ungrouped_attributes[0].slot().unwrap();
        assert_eq!(
            slot.allowable_range_ecl.as_deref(),
            Some("<< 442083009 |Body structure (body structure)|")
        );
    }

    #[test]
    fn keeps_nested_expressions_verbatim() {
        let logical = parse_template(
            "71388002: 363702006 |Has focus| = (404684003 |Clinical finding|: 363698007 = 39057004)",
        )
        .unwrap();
        assert_eq!(
            logical.ungrouped_attributes[0].value,
            AttributeValue::Expression("404684003 |Clinical finding|: 363698007 = 39057004".to_string())
        );
    }

    #[test]
    fn rejects_duplicate_slot_names() {
        let error = parse_template(
            "71388002: { 405813007 = [[+id @site]] }, { 260686004 = [[+id @site]] }",
        )
        .unwrap_err();
        assert!(error.message.contains("duplicate slot name 'site'"));
    }

    #[test]
    fn rejects_unknown_slot_reference() {
        let error = parse_template("71388002: 405813007 = [[+id $missing]]").unwrap_err();
        assert!(error.message.contains("$missing"));
    }

    #[test]
    fn rejects_unterminated_constraint() {
        let error = parse_template("71388002: 405813007 = [[+id(<< 442083009 @site]]").unwrap_err();
        assert_eq!(error.message, "unterminated constraint expression");
        assert_eq!(error.offset, 27);
    }

    #[test]
    fn rejects_unclosed_group() {
        let error = parse_template("71388002: { 405813007 = 12656001 ").unwrap_err();
        assert!(error.message.starts_with("malformed attribute group"));
    }

    #[test]
    fn rejects_malformed_slot() {
        let error = parse_template("71388002: 405813007 = [[+id @site").unwrap_err();
        assert!(error.message.starts_with("malformed slot"));
    }

    #[test]
    fn rejects_inverted_cardinality() {
        let error = parse_template("71388002: [[~2..1]] 405813007 = 12656001").unwrap_err();
        assert!(error.message.starts_with("malformed cardinality"));
    }

    #[test]
    fn rejects_trailing_input() {
        let error = parse_template("71388002: 405813007 = 12656001 }").unwrap_err();
        assert_eq!(error.message, "unexpected input after template");
    }
}
