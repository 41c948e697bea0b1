//! Batch result types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::ClassificationError;
use crate::compile::CompileError;
use crate::llm::AssistFailure;
use crate::models::{CompiledField, InputIssue};
use crate::resolve::ResolutionWarning;

/// Why a field produced no DAX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Classification,
    Resolution,
    Compile,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Classification => "classification",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Compile => "compile",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A field that failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub caption: String,
    pub table: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl FieldError {
    pub fn new(
        table: impl Into<String>,
        caption: impl Into<String>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            caption: caption.into(),
            table: table.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn compile(table: &str, caption: &str, err: &CompileError) -> Self {
        Self::new(table, caption, ErrorKind::Compile, err.to_string())
    }

    pub fn classification(err: &ClassificationError) -> Self {
        Self::new(err.table(), err.field(), ErrorKind::Classification, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidInput,
    Classification,
    CycleDetected,
    UnresolvedReference,
    AmbiguousReference,
    /// Assist call or answer unusable; rule-based output kept
    AssistFallback,
    /// Assist call exceeded its deadline; rule-based output kept
    ExternalAssistTimeout,
}

/// Something worth a look that did not stop any field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub kind: WarningKind,
    pub message: String,
}

impl BatchWarning {
    pub fn field(table: &str, caption: &str, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            caption: Some(caption.to_string()),
            table: Some(table.to_string()),
            kind,
            message: message.into(),
        }
    }

    pub fn batch(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            caption: None,
            table: None,
            kind,
            message: message.into(),
        }
    }
}

impl From<&ResolutionWarning> for BatchWarning {
    fn from(warning: &ResolutionWarning) -> Self {
        let kind = match warning {
            ResolutionWarning::CycleDetected { .. } => WarningKind::CycleDetected,
            ResolutionWarning::UnresolvedReference { .. } => WarningKind::UnresolvedReference,
            ResolutionWarning::AmbiguousReference { .. } => WarningKind::AmbiguousReference,
        };
        BatchWarning::field(warning.table(), warning.field(), kind, warning.to_string())
    }
}

impl From<&InputIssue> for BatchWarning {
    fn from(issue: &InputIssue) -> Self {
        let (table, caption) = match issue {
            InputIssue::DuplicateField { table, caption }
            | InputIssue::FormulaOnSource { table, caption } => (table, caption),
        };
        BatchWarning::field(table, caption, WarningKind::InvalidInput, issue.to_string())
    }
}

impl From<&AssistFailure> for BatchWarning {
    fn from(failure: &AssistFailure) -> Self {
        let kind = if failure.timed_out {
            WarningKind::ExternalAssistTimeout
        } else {
            WarningKind::AssistFallback
        };
        BatchWarning::batch(
            kind,
            format!("{} assist unavailable: {}", failure.stage, failure.message),
        )
    }
}

/// Outcome of converting one batch of fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Compiled fields, sorted by table then caption
    pub compiled: Vec<CompiledField>,
    /// Failed fields, sorted by table then caption
    pub errors: Vec<FieldError>,
    pub warnings: Vec<BatchWarning>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Whether the batch stopped early; unstarted fields are in `errors` as cancelled
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchResult {
    /// Compiled field by table and caption
    pub fn get(&self, table: &str, caption: &str) -> Option<&CompiledField> {
        self.compiled
            .iter()
            .find(|c| c.table == table && c.caption == caption)
    }

    /// Error entry for a field
    pub fn error_for(&self, table: &str, caption: &str) -> Option<&FieldError> {
        self.errors
            .iter()
            .find(|e| e.table == table && e.caption == caption)
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0 && !self.cancelled
    }

    /// Sort outputs and fill in the counts
    pub(crate) fn finalize(mut self) -> Self {
        self.compiled.sort_by(|a, b| {
            (a.table.as_str(), a.caption.as_str()).cmp(&(b.table.as_str(), b.caption.as_str()))
        });
        self.errors.sort_by(|a, b| {
            (a.table.as_str(), a.caption.as_str()).cmp(&(b.table.as_str(), b.caption.as_str()))
        });
        self.success_count = self.compiled.len();
        self.failure_count = self.errors.len();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PowerBiType;

    #[test]
    fn test_finalize_sorts_and_counts() {
        let result = BatchResult {
            compiled: vec![
                CompiledField::new("B", "Orders", "1", PowerBiType::Column),
                CompiledField::new("A", "Orders", "2", PowerBiType::Column),
                CompiledField::new("Z", "Customers", "3", PowerBiType::Measure),
            ],
            errors: vec![FieldError::new("T", "X", ErrorKind::Compile, "bad")],
            ..Default::default()
        }
        .finalize();

        let order: Vec<&str> = result.compiled.iter().map(|c| c.caption.as_str()).collect();
        assert_eq!(order, vec!["Z", "A", "B"]);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count, 1);
        assert!(!result.is_complete_success());
        assert!(result.get("Orders", "A").is_some());
    }

    #[test]
    fn test_serialized_shape() {
        let result = BatchResult {
            errors: vec![FieldError::new("T", "X", ErrorKind::Cancelled, "Batch cancelled")],
            warnings: vec![BatchWarning::batch(WarningKind::ExternalAssistTimeout, "late")],
            ..Default::default()
        }
        .finalize();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["errors"][0]["kind"], "cancelled");
        assert_eq!(json["warnings"][0]["kind"], "external_assist_timeout");
        assert!(json["warnings"][0].get("caption").is_none());
        assert_eq!(json["failure_count"], 1);
    }
}
