//! Tableau formula front end
//!
//! Lexer, expression tree and parser for the Tableau calculation language, plus the
//! bracket-reference scan the dependency graph is built from.

pub mod ast;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, LodKind, UnaryOp};
pub use error::{FormulaError, FormulaResult};
pub use functions::{FunctionClass, classify_function};
pub use parser::parse_formula;

use once_cell::sync::Lazy;
use regex::Regex;

use lexer::{Lexer, Token};

/// Fallback scan for `[Name]` when a formula does not tokenize
static BRACKET_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[((?:[^\]]|\]\])+)\]").expect("valid reference pattern"));

/// Extract the captions referenced by a formula
///
/// Returns bracket-delimited references in order of first appearance, deduplicated.
/// References inside string literals and comments are ignored. For `[Qualifier].[Name]` only
/// `Name` is returned. Formulas that fail to tokenize are scanned with a plain regex instead.
pub fn extract_references(formula: &str) -> Vec<String> {
    let mut references: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !references.contains(&name) {
            references.push(name);
        }
    };

    match Lexer::new(formula).tokenize() {
        Ok(tokens) => {
            for spanned in tokens {
                if let Token::Reference { name, .. } = spanned.token {
                    push(name);
                }
            }
        }
        Err(_) => {
            for cap in BRACKET_REFERENCE.captures_iter(formula) {
                push(cap[1].replace("]]", "]"));
            }
        }
    }

    references
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_references_dedup_in_order() {
        assert_eq!(
            extract_references("[B] + [A] * [B]"),
            vec!["B".to_string(), "A".to_string()]
        );
    }

    #[test]
    fn test_extract_references_ignores_strings_and_comments() {
        let formula = "IF [Status] = '[Closed]' THEN [Amount] END // uses [Legacy]";
        assert_eq!(extract_references(formula), vec!["Status", "Amount"]);
    }

    #[test]
    fn test_extract_references_qualified() {
        assert_eq!(
            extract_references("[Sales] > [Parameters].[Threshold]"),
            vec!["Sales", "Threshold"]
        );
    }

    #[test]
    fn test_extract_references_falls_back_on_lex_error() {
        assert_eq!(extract_references("[Sales] @ [Cost]"), vec!["Sales", "Cost"]);
    }
}
