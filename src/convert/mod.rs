//! Conversion orchestrator
//!
//! Sequences classification, resolution and compilation over a batch of fields and collects
//! per-field outcomes into a [`BatchResult`].
//!
//! # Example
//!
//! ```rust
//! use dax_conversion_sdk::convert::convert;
//! use dax_conversion_sdk::models::Field;
//!
//! let result = convert(&[
//!     Field::source("Orders", "Profit"),
//!     Field::source("Orders", "Sales"),
//!     Field::calculated("Orders", "Profit Ratio", "SUM([Profit])/SUM([Sales])"),
//! ]);
//! assert_eq!(
//!     result.compiled[0].dax,
//!     "DIVIDE(SUM('Orders'[Profit]), SUM('Orders'[Sales]))"
//! );
//! ```

pub mod assist;
pub mod cancel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod result;

pub use assist::{AssistedDax, DaxAssistant, LlmDaxAssistant};
pub use cancel::CancellationToken;
pub use config::ConversionConfig;
pub use error::{ConversionError, ConversionResult};
pub use orchestrator::ConversionOrchestrator;
pub use result::{BatchResult, BatchWarning, ErrorKind, FieldError, WarningKind};

use crate::models::Field;

/// Convert a batch with the rule classifier and default settings
pub fn convert(fields: &[Field]) -> BatchResult {
    convert_with_config(fields, &ConversionConfig::default())
}

/// Convert a batch with the rule classifier
///
/// The assist section of `config` is ignored; use [`ConversionOrchestrator::from_config`] for
/// assisted runs.
pub fn convert_with_config(fields: &[Field], config: &ConversionConfig) -> BatchResult {
    ConversionOrchestrator::new(config.clone()).convert_with_rules(fields)
}

/// Parse a JSON list of field records and convert it
pub fn convert_json(input: &str, config: &ConversionConfig) -> ConversionResult<BatchResult> {
    let fields: Vec<Field> = serde_json::from_str(input)?;
    Ok(convert_with_config(&fields, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LlmClassifier;
    use crate::llm::AssistConfig;
    use crate::llm::client::MockLlmClient;
    use crate::models::PowerBiType;

    fn workbook() -> Vec<Field> {
        vec![
            Field::source("Orders", "Profit"),
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Profit Ratio", "SUM([Profit])/SUM([Sales])"),
            Field::calculated("Orders", "Running Total", "TOTAL([Profit Ratio])"),
            Field::calculated("Orders", "Margin Band", "IF [Profit] > 0 THEN 'gain' ELSE 'loss' END"),
            Field::calculated("Orders", "Broken", "SUM([Profit]"),
            Field::calculated("Orders", "Cumulative", "RUNNING_SUM(SUM([Sales]))"),
        ]
    }

    #[test]
    fn test_partial_failure() {
        let result = convert(&workbook());

        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count, 2);
        assert!(!result.cancelled);
        assert_eq!(
            result.error_for("Orders", "Broken").unwrap().kind,
            ErrorKind::Classification
        );
        assert_eq!(
            result.error_for("Orders", "Cumulative").unwrap().kind,
            ErrorKind::Compile
        );
        assert_eq!(
            result.get("Orders", "Margin Band").unwrap().powerbi_type,
            PowerBiType::Column
        );
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let sequential = convert_with_config(&workbook(), &ConversionConfig::default().with_workers(1));
        let parallel = convert_with_config(&workbook(), &ConversionConfig::default().with_workers(4));
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_duplicate_field_reported() {
        let result = convert(&[
            Field::source("T", "A"),
            Field::calculated("T", "B", "[A] + 1"),
            Field::calculated("t", "b", "[A] + 2"),
        ]);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.errors[0].kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn test_cancelled_before_compilation() {
        let orchestrator = ConversionOrchestrator::new(ConversionConfig::default());
        orchestrator.cancellation_token().cancel();

        let result = orchestrator.convert_with_rules(&workbook());
        assert!(result.cancelled);
        assert_eq!(result.success_count, 0);
        assert!(
            result
                .errors
                .iter()
                .filter(|e| e.kind == ErrorKind::Cancelled)
                .count()
                >= 4
        );
    }

    #[test]
    fn test_convert_json() {
        let input = r#"[
            {"caption": "Sales", "datasource": "Orders", "role": "source"},
            {"caption": "Big", "table": "Orders", "kind": "calculated", "formula": "[Sales] > 100"}
        ]"#;
        let result = convert_json(input, &ConversionConfig::default()).unwrap();
        assert_eq!(result.compiled[0].dax, "'Orders'[Sales] > 100");

        assert!(matches!(
            convert_json("{not json", &ConversionConfig::default()),
            Err(ConversionError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_async_convert_with_failing_assist() {
        let assist = AssistConfig::default().with_max_retries(0);
        let orchestrator = ConversionOrchestrator::new(ConversionConfig::default())
            .with_classifier(LlmClassifier::new(MockLlmClient::failing(), assist));

        let result = orchestrator.convert(&workbook()).await;
        assert_eq!(result.success_count, 3);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::AssistFallback)
        );
    }
}
