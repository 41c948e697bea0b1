//! Error types for field classification

use thiserror::Error;

use crate::formula::FormulaError;

/// A field whose type could not be decided from its formula; it defaults to measure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("Formula of '{field}' could not be parsed: {source}")]
    Unparseable {
        table: String,
        field: String,
        #[source]
        source: FormulaError,
    },

    #[error("Calculated field '{field}' has no formula")]
    MissingFormula { table: String, field: String },

    #[error("Field '{field}' not found in table '{table}'")]
    UnknownField { table: String, field: String },
}

impl ClassificationError {
    pub fn table(&self) -> &str {
        match self {
            ClassificationError::Unparseable { table, .. }
            | ClassificationError::MissingFormula { table, .. }
            | ClassificationError::UnknownField { table, .. } => table,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ClassificationError::Unparseable { field, .. }
            | ClassificationError::MissingFormula { field, .. }
            | ClassificationError::UnknownField { field, .. } => field,
        }
    }
}

/// Result type for classification
pub type ClassificationResult<T> = Result<T, ClassificationError>;
