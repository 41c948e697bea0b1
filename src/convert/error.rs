//! Error types for whole-call conversion failures
//!
//! Field-level problems never surface here; they are collected into the batch result.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop a conversion call before any field is processed
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Input is not a JSON list of field records
    #[error("Invalid field metadata JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error with path context
    #[error("IO error with {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    /// Short message suitable for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ConversionError::InvalidJson(e) => format!(
                "The input is not a valid list of fields (line {}, column {}).",
                e.line(),
                e.column()
            ),
            ConversionError::Config(msg) => format!("Configuration problem: {}", msg),
            ConversionError::Io { path, .. } => format!("Could not read {}.", path.display()),
        }
    }
}

/// Result type for conversion calls
pub type ConversionResult<T> = Result<T, ConversionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_json_message() {
        let err: ConversionError = serde_json::from_str::<Vec<u8>>("{").unwrap_err().into();
        assert!(err.to_string().starts_with("Invalid field metadata JSON"));
        assert!(err.user_message().contains("line 1"));
    }
}
