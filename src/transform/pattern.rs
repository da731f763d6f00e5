//! Term templates as patterns: `$slot$` placeholders become capture groups so
//! slot text can be read back out of an existing description.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Concept, DescriptionType};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([^$\s]+)\$").expect("placeholder pattern"));

/// Placeholder names in a term template, in order of appearance.
pub fn placeholders(term_template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(term_template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Replaces every placeholder with the text `resolve` returns for it. The
/// second argument tells whether the placeholder opens the term.
pub fn substitute<E>(
    term_template: &str,
    mut resolve: impl FnMut(&str, bool) -> Result<String, E>,
) -> Result<String, E> {
    let mut term = String::with_capacity(term_template.len());
    let mut last = 0;
    for placeholder in PLACEHOLDER_RE.find_iter(term_template) {
        term.push_str(&term_template[last..placeholder.start()]);
        let name = placeholder.as_str().trim_matches('$');
        term.push_str(&resolve(name, placeholder.start() == 0)?);
        last = placeholder.end();
    }
    term.push_str(&term_template[last..]);
    Ok(term)
}

/// A compiled term template.
#[derive(Debug, Clone)]
pub struct TermPattern {
    regex: Regex,
    slot_names: Vec<String>,
}

impl TermPattern {
    pub fn compile(term_template: &str) -> Result<Self, regex::Error> {
        let mut pattern = String::from("^");
        let mut slot_names = Vec::new();
        let mut last = 0;
        for placeholder in PLACEHOLDER_RE.find_iter(term_template) {
            pattern.push_str(&regex::escape(&term_template[last..placeholder.start()]));
            pattern.push_str("(.+)");
            slot_names.push(placeholder.as_str().trim_matches('$').to_string());
            last = placeholder.end();
        }
        pattern.push_str(&regex::escape(&term_template[last..]));
        pattern.push('$');

        Ok(Self {
            regex: Regex::new(&pattern)?,
            slot_names,
        })
    }

    pub fn slot_names(&self) -> &[String] {
        &self.slot_names
    }

    /// Slot text captured from `term`, or `None` when the term does not
    /// follow this template.
    pub fn capture(&self, term: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(term)?;
        Some(
            self.slot_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    captures
                        .get(i + 1)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

pub fn compile_all<'a>(
    term_templates: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<TermPattern>, regex::Error> {
    term_templates.into_iter().map(TermPattern::compile).collect()
}

/// Slot text read from the concept's active FSNs and synonyms.
///
/// The first capture of a slot wins; FSN patterns are tried before synonym
/// patterns.
pub fn slot_term_values(
    fsn_patterns: &[TermPattern],
    synonym_patterns: &[TermPattern],
    concept: &Concept,
) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let sources = [
        (fsn_patterns, DescriptionType::Fsn),
        (synonym_patterns, DescriptionType::Synonym),
    ];
    for (patterns, description_type) in sources {
        for pattern in patterns {
            for description in concept.active_descriptions(description_type) {
                if let Some(captured) = pattern.capture(&description.term) {
                    for (name, term) in captured {
                        values.entry(name).or_insert(term);
                    }
                }
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConceptDescription;

    #[test]
    fn lists_placeholders_in_order() {
        assert_eq!(
            placeholders("$actionTerm$ of $procSiteTerm$ using computed tomography guidance (procedure)"),
            vec!["actionTerm", "procSiteTerm"]
        );
        assert!(placeholders("Computed tomography (procedure)").is_empty());
    }

    #[test]
    fn substitutes_in_place() {
        let term = substitute::<()>("$a$ of $b$", |name, at_start| {
            Ok(format!("{}:{}", name, at_start))
        })
        .unwrap();
        assert_eq!(term, "a:true of b:false");
    }

    #[test]
    fn captures_slot_text_from_fsn() {
        let pattern = TermPattern::compile(
            "$actionTerm$ of $procSiteTerm$ using computed tomography guidance (procedure)",
        )
        .unwrap();
        let captured = pattern
            .capture("Biopsy of liver using computed tomography guidance (procedure)")
            .unwrap();
        assert_eq!(captured["actionTerm"], "Biopsy");
        assert_eq!(captured["procSiteTerm"], "liver");
        assert!(pattern.capture("Biopsy of liver (procedure)").is_none());
    }

    #[test]
    fn reads_values_from_active_descriptions_only() {
        let fsn = compile_all(["$site$ scan (procedure)"]).unwrap();
        let synonyms = compile_all(["Scan of $site$", "$other$ scan"]).unwrap();

        let mut retired = ConceptDescription::new(DescriptionType::Synonym, "Scan of kidney");
        retired.active = false;
        let mut concept = Concept::new("1");
        concept.descriptions = vec![
            retired,
            ConceptDescription::new(DescriptionType::Fsn, "Liver scan (procedure)"),
            ConceptDescription::new(DescriptionType::Synonym, "Scan of liver"),
            ConceptDescription::new(DescriptionType::Synonym, "Hepatic scan"),
        ];

        let values = slot_term_values(&fsn, &synonyms, &concept);
        assert_eq!(values["site"], "Liver");
        assert_eq!(values["other"], "Hepatic");
    }
}
