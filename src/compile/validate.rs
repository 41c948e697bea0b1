//! Naked-measure validation
//!
//! A measure must be referenced as `[Measure]`: never wrapped in a simple aggregator
//! (`SUM([Measure])`) and never table-qualified (`'Orders'[Measure]`). Compiled DAX should
//! never contain either form; DAX returned by the assist model often does.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{CompileError, CompileResult};
use crate::models::FieldIndex;

/// `SUM([Name])` and friends, with the bracketed name captured
static WRAPPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SUM|AVG|AVERAGE|MIN|MAX|COUNT)\s*\(\s*\[((?:[^\]]|\]\])+)\]\s*\)")
        .expect("valid wrapped-measure pattern")
});

/// `'Table'[Name]` or `Table[Name]`
static PREFIXED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"('(?:[^']|'')+'|\b[A-Za-z_][A-Za-z0-9_]*)\s*\[((?:[^\]]|\]\])+)\]")
        .expect("valid prefixed-measure pattern")
});

/// Corrections stop after this many passes; anything left is a violation
const MAX_PASSES: usize = 8;

/// What to do with naked-measure violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Rewrite violations to naked references and record a review note per fix
    #[default]
    AutoCorrect,
    /// Fail the field on the first violation
    Reject,
}

/// DAX after validation, with notes for every correction applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub dax: String,
    pub notes: Vec<String>,
}

/// Checks DAX text against the measures of one field index
pub struct NakedMeasureValidator<'a> {
    index: &'a FieldIndex,
}

impl<'a> NakedMeasureValidator<'a> {
    pub fn new(index: &'a FieldIndex) -> Self {
        Self { index }
    }

    /// Every violation in `dax`, as the offending text
    pub fn violations(&self, dax: &str) -> Vec<String> {
        let literals = string_literals(dax);
        let mut found = Vec::new();
        for caps in WRAPPED.captures_iter(dax) {
            if self.is_wrapped_violation(&caps, &literals) {
                found.push(caps[0].to_string());
            }
        }
        for caps in PREFIXED.captures_iter(dax) {
            if self.is_prefixed_violation(&caps, &literals) {
                found.push(caps[0].to_string());
            }
        }
        found
    }

    pub fn validate(&self, dax: &str, policy: ValidationPolicy) -> CompileResult<Validated> {
        let violations = self.violations(dax);
        if violations.is_empty() {
            return Ok(Validated {
                dax: dax.to_string(),
                notes: Vec::new(),
            });
        }
        if policy == ValidationPolicy::Reject {
            return Err(CompileError::NakedMeasureViolation { violations });
        }

        let mut current = dax.to_string();
        let mut notes = Vec::new();
        for _ in 0..MAX_PASSES {
            let next = self.correct_once(&current, &mut notes);
            if next == current {
                break;
            }
            current = next;
        }

        let remaining = self.violations(&current);
        if !remaining.is_empty() {
            return Err(CompileError::NakedMeasureViolation {
                violations: remaining,
            });
        }
        debug!(fixes = notes.len(), "Corrected naked-measure violations");
        Ok(Validated {
            dax: current,
            notes,
        })
    }

    fn correct_once(&self, dax: &str, notes: &mut Vec<String>) -> String {
        let literals = string_literals(dax);
        let unwrapped = WRAPPED.replace_all(dax, |caps: &Captures<'_>| {
            if self.is_wrapped_violation(caps, &literals) {
                notes.push(format!(
                    "Removed {} around measure [{}]",
                    caps[1].to_uppercase(),
                    &caps[2]
                ));
                format!("[{}]", &caps[2])
            } else {
                caps[0].to_string()
            }
        });

        let literals = string_literals(&unwrapped);
        PREFIXED
            .replace_all(&unwrapped, |caps: &Captures<'_>| {
                if self.is_prefixed_violation(caps, &literals) {
                    notes.push(format!(
                        "Removed table prefix {} from measure [{}]",
                        &caps[1], &caps[2]
                    ));
                    format!("[{}]", &caps[2])
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    fn is_wrapped_violation(&self, caps: &Captures<'_>, literals: &[Range<usize>]) -> bool {
        let Some(whole) = caps.get(0) else {
            return false;
        };
        !in_literal(whole.start(), literals)
            && self.index.is_measure_name(&unescape_name(&caps[2]))
    }

    fn is_prefixed_violation(&self, caps: &Captures<'_>, literals: &[Range<usize>]) -> bool {
        let Some(whole) = caps.get(0) else {
            return false;
        };
        if in_literal(whole.start(), literals) {
            return false;
        }
        let prefix = &caps[1];
        let name = unescape_name(&caps[2]);
        let (table, quoted) = match prefix.strip_prefix('\'').and_then(|p| p.strip_suffix('\'')) {
            Some(inner) => (inner.replace("''", "'"), true),
            None => (prefix.to_string(), false),
        };
        // bare identifiers are only tables when the index knows them (so `SUMX[...]` is not)
        if !quoted && !self.index.has_table(&table) {
            return false;
        }
        self.index.is_measure_name(&name) && !self.index.has_column(&table, &name)
    }
}

/// Validate `dax` against the measures in `index`
pub fn validate_dax(
    dax: &str,
    index: &FieldIndex,
    policy: ValidationPolicy,
) -> CompileResult<Validated> {
    NakedMeasureValidator::new(index).validate(dax, policy)
}

fn unescape_name(name: &str) -> String {
    name.replace("]]", "]")
}

/// Byte ranges of `"..."` string literals (with `""` escapes)
fn string_literals(dax: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = None;
    let mut chars = dax.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '"' {
            continue;
        }
        match start {
            None => start = Some(i),
            Some(s) => {
                if chars.peek().is_some_and(|(_, next)| *next == '"') {
                    chars.next();
                } else {
                    ranges.push(s..i + 1);
                    start = None;
                }
            }
        }
    }
    if let Some(s) = start {
        ranges.push(s..dax.len());
    }
    ranges
}

fn in_literal(offset: usize, literals: &[Range<usize>]) -> bool {
    literals.iter().any(|r| r.contains(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Field, PowerBiType};

    fn index() -> FieldIndex {
        let mut fields = vec![
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Profit Ratio", "SUM([Profit]) / SUM([Sales])"),
        ];
        fields[1].powerbi_type = Some(PowerBiType::Measure);
        FieldIndex::build(&fields).0
    }

    #[test]
    fn test_clean_dax_passes() {
        let index = index();
        let validated = validate_dax(
            "IF([Profit Ratio] > 0.1, SUM('Orders'[Sales]))",
            &index,
            ValidationPolicy::Reject,
        )
        .unwrap();
        assert!(validated.notes.is_empty());
    }

    #[test]
    fn test_wrapped_measure_corrected() {
        let index = index();
        let validated =
            validate_dax("SUM([Profit Ratio]) * 2", &index, ValidationPolicy::AutoCorrect).unwrap();
        assert_eq!(validated.dax, "[Profit Ratio] * 2");
        assert_eq!(validated.notes, vec!["Removed SUM around measure [Profit Ratio]"]);
    }

    #[test]
    fn test_prefixed_measure_corrected() {
        let index = index();
        let validated = validate_dax(
            "'Orders'[Profit Ratio] + Orders[Profit Ratio]",
            &index,
            ValidationPolicy::AutoCorrect,
        )
        .unwrap();
        assert_eq!(validated.dax, "[Profit Ratio] + [Profit Ratio]");
        assert_eq!(validated.notes.len(), 2);
    }

    #[test]
    fn test_nested_violation_needs_two_passes() {
        let index = index();
        let validated = validate_dax(
            "MAX(SUM('Orders'[Profit Ratio]))",
            &index,
            ValidationPolicy::AutoCorrect,
        )
        .unwrap();
        assert_eq!(validated.dax, "[Profit Ratio]");
    }

    #[test]
    fn test_reject_policy() {
        let index = index();
        let err = validate_dax("SUM([Profit Ratio])", &index, ValidationPolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            CompileError::NakedMeasureViolation {
                violations: vec!["SUM([Profit Ratio])".into()]
            }
        );
    }

    #[test]
    fn test_columns_and_literals_untouched() {
        let index = index();
        let dax = "SUM('Orders'[Sales]) & \"SUM([Profit Ratio])\"";
        let validator = NakedMeasureValidator::new(&index);
        assert!(validator.violations(dax).is_empty());
    }
}
