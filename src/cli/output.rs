//! Output formatting for CLI

use crate::convert::{BatchResult, ErrorKind};

/// Human-readable summary of a batch, written to stderr by the binary
pub fn format_summary(result: &BatchResult) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n✅ Compiled {} field(s), {} failed\n",
        result.success_count, result.failure_count
    ));
    if result.cancelled {
        output.push_str("⚠️  Batch cancelled before all fields were compiled\n");
    }

    let reviewed: Vec<_> = result.compiled.iter().filter(|c| c.needs_review()).collect();
    if !reviewed.is_empty() {
        output.push_str("\n⚠️  Needs Review:\n");
        for compiled in reviewed {
            output.push_str(&format!("  - '{}'[{}]\n", compiled.table, compiled.caption));
            for note in &compiled.review_notes {
                output.push_str(&format!("      {}\n", note));
            }
        }
    }

    let failed: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.kind != ErrorKind::Cancelled)
        .collect();
    if !failed.is_empty() {
        output.push_str("\n⚠️  Errors:\n");
        for error in failed {
            output.push_str(&format!(
                "  - '{}'[{}] ({}): {}\n",
                error.table, error.caption, error.kind, error.reason
            ));
        }
    }

    if !result.warnings.is_empty() {
        output.push_str("\n⚠️  Warnings:\n");
        for warning in &result.warnings {
            output.push_str(&format!("  - {}\n", warning.message));
        }
    }

    output
}

/// Result of `check` for one field
pub fn format_check(result: &BatchResult, table: &str, caption: &str) -> String {
    let mut output = String::new();
    match (result.get(table, caption), result.error_for(table, caption)) {
        (Some(compiled), _) => {
            output.push_str(&format!("{} ({})\n", compiled.dax, compiled.powerbi_type));
            for note in &compiled.review_notes {
                output.push_str(&format!("  note: {}\n", note));
            }
        }
        (None, Some(error)) => output.push_str(&format!("error ({}): {}\n", error.kind, error.reason)),
        (None, None) => output.push_str("no result\n"),
    }
    for warning in result
        .warnings
        .iter()
        .filter(|w| w.caption.as_deref() == Some(caption))
    {
        output.push_str(&format!("  warning: {}\n", warning.message));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::convert;
    use crate::models::Field;

    #[test]
    fn test_summary_lists_errors_and_notes() {
        let result = convert(&[
            Field::source("T", "Sales"),
            Field::calculated("T", "Total", "SUM([Sales])"),
            Field::calculated("T", "Twice", "SUM([Total]) * 2"),
            Field::calculated("T", "Run", "RUNNING_SUM([Total])"),
        ]);
        let summary = format_summary(&result);
        assert!(summary.contains("Compiled 2 field(s), 1 failed"));
        assert!(summary.contains("'T'[Twice]"));
        assert!(summary.contains("Removed SUM around measure [Total]"));
        assert!(summary.contains("'T'[Run] (compile)"));
    }

    #[test]
    fn test_check_output() {
        let result = convert(&[
            Field::source("T", "A"),
            Field::calculated("T", "Z", "ZN([A])"),
        ]);
        assert_eq!(format_check(&result, "T", "Z"), "COALESCE('T'[A], 0) (column)\n");
    }
}
