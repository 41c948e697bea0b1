//! Error types for DAX compilation

use thiserror::Error;

use crate::formula::FormulaError;

/// Errors that stop a single field from compiling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Measure references still wrapped or table-qualified after validation
    #[error("Naked measure violation: {}", violations.join("; "))]
    NakedMeasureViolation { violations: Vec<String> },

    /// Tableau function with no DAX equivalent
    #[error("Function {function} has no DAX equivalent")]
    UnsupportedFunction { function: String },

    #[error("Invalid arguments to {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Calculated field has no formula")]
    MissingFormula,

    #[error(transparent)]
    Parse(#[from] FormulaError),
}

impl CompileError {
    pub(crate) fn invalid(function: &str, reason: impl Into<String>) -> Self {
        CompileError::InvalidArguments {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(function: &str) -> Self {
        CompileError::UnsupportedFunction {
            function: function.to_string(),
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::NakedMeasureViolation {
            violations: vec!["SUM([M])".into(), "'T'[M]".into()],
        };
        assert_eq!(err.to_string(), "Naked measure violation: SUM([M]); 'T'[M]");

        let err: CompileError = FormulaError::new(3, "unexpected end of formula").into();
        assert_eq!(
            err.to_string(),
            "Parse error at offset 3: unexpected end of formula"
        );
    }
}
