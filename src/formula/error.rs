//! Error types for formula parsing

use thiserror::Error;

/// A lexing or parsing failure with the byte offset it was detected at
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Parse error at offset {offset}: {message}")]
pub struct FormulaError {
    pub offset: usize,
    pub message: String,
}

impl FormulaError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for formula parsing
pub type FormulaResult<T> = Result<T, FormulaError>;
