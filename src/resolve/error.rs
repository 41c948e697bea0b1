//! Warnings raised while resolving field references

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Non-fatal problems found while resolving references; the field still compiles
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ResolutionWarning {
    #[error("Circular reference from '{field}' to [{reference}] (cycle: {})", cycle.join(" -> "))]
    CycleDetected {
        table: String,
        field: String,
        reference: String,
        cycle: Vec<String>,
    },

    #[error("Unresolved reference [{reference}] in '{field}' left as written for manual review")]
    UnresolvedReference {
        table: String,
        field: String,
        reference: String,
    },

    #[error(
        "Ambiguous reference [{reference}] in '{field}' matches {candidates} tables; using '{chosen_table}'"
    )]
    AmbiguousReference {
        table: String,
        field: String,
        reference: String,
        chosen_table: String,
        candidates: usize,
    },
}

impl ResolutionWarning {
    /// Table of the field the warning was raised for
    pub fn table(&self) -> &str {
        match self {
            ResolutionWarning::CycleDetected { table, .. }
            | ResolutionWarning::UnresolvedReference { table, .. }
            | ResolutionWarning::AmbiguousReference { table, .. } => table,
        }
    }

    /// Caption of the field the warning was raised for
    pub fn field(&self) -> &str {
        match self {
            ResolutionWarning::CycleDetected { field, .. }
            | ResolutionWarning::UnresolvedReference { field, .. }
            | ResolutionWarning::AmbiguousReference { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display() {
        let warning = ResolutionWarning::CycleDetected {
            table: "Orders".to_string(),
            field: "A".to_string(),
            reference: "B".to_string(),
            cycle: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(
            warning.to_string(),
            "Circular reference from 'A' to [B] (cycle: A -> B)"
        );
        assert_eq!(warning.field(), "A");
        assert_eq!(warning.table(), "Orders");
    }
}
