//! DAX generation assist
//!
//! Fields the rules could not compile, or compiled only with review notes, can be offered to
//! an assist model. An answer is accepted only when its caption is one of the requested
//! fields, its type equals the classified type, and its DAX passes naked-measure validation.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compile::{Validated, ValidationPolicy, validate_dax};
use crate::llm::{
    AssistConfig, AssistFailure, COMPILATION_PROMPT, CompletionRequest, LlmClient,
    complete_with_retry, parse_dax_response,
};
use crate::models::{FieldId, FieldIndex, FieldKind, PowerBiType};

/// Outcome of one assist round
#[derive(Debug, Clone, Default)]
pub struct AssistedDax {
    /// Accepted DAX by field
    pub accepted: BTreeMap<FieldId, Validated>,
    /// Answers that failed validation, with the reason
    pub rejected: Vec<(FieldId, String)>,
    pub failures: Vec<AssistFailure>,
}

/// Strategy producing DAX for fields the rules left open
#[async_trait]
pub trait DaxAssistant: Send + Sync {
    fn name(&self) -> &str;

    /// Ask for DAX for `candidates`; `index` carries every field with its final type
    async fn suggest(&self, index: &FieldIndex, candidates: &[FieldId]) -> AssistedDax;
}

#[derive(Debug, Serialize)]
struct MetadataEntry<'a> {
    caption: &'a str,
    table: &'a str,
    kind: FieldKind,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    powerbi_type: Option<PowerBiType>,
}

#[derive(Debug, Serialize)]
struct FormulaEntry<'a> {
    caption: &'a str,
    table: &'a str,
    formula: &'a str,
    #[serde(rename = "type")]
    powerbi_type: PowerBiType,
}

#[derive(Debug, Serialize)]
struct CompilationInput<'a> {
    metadata: Vec<MetadataEntry<'a>>,
    formulas: Vec<FormulaEntry<'a>>,
}

/// [`DaxAssistant`] backed by an [`LlmClient`]
pub struct LlmDaxAssistant<C: LlmClient> {
    client: C,
    config: AssistConfig,
    policy: ValidationPolicy,
}

impl<C: LlmClient> LlmDaxAssistant<C> {
    pub fn new(client: C, config: AssistConfig) -> Self {
        Self {
            client,
            config,
            policy: ValidationPolicy::default(),
        }
    }

    /// Validation applied to answers
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check one answer against the requested field
    fn accept(
        &self,
        index: &FieldIndex,
        id: FieldId,
        dax: &str,
        answered_type: &str,
    ) -> Result<Validated, String> {
        let expected = index.get(id).powerbi_type.unwrap_or(PowerBiType::Measure);
        let answered = PowerBiType::from_str(answered_type)?;
        if answered != expected {
            return Err(format!(
                "assist answered {} but the field is classified {}",
                answered, expected
            ));
        }
        if dax.trim().is_empty() {
            return Err("assist returned empty DAX".to_string());
        }
        validate_dax(dax.trim(), index, self.policy).map_err(|e| e.to_string())
    }

    fn request_body(&self, index: &FieldIndex, chunk: &[FieldId]) -> serde_json::Result<String> {
        let input = CompilationInput {
            metadata: index
                .fields()
                .iter()
                .map(|f| MetadataEntry {
                    caption: &f.caption,
                    table: &f.table,
                    kind: f.kind,
                    powerbi_type: f.powerbi_type,
                })
                .collect(),
            formulas: chunk
                .iter()
                .map(|&id| {
                    let field = index.get(id);
                    FormulaEntry {
                        caption: &field.caption,
                        table: &field.table,
                        formula: field.formula_text(),
                        powerbi_type: field.powerbi_type.unwrap_or(PowerBiType::Measure),
                    }
                })
                .collect(),
        };
        serde_json::to_string_pretty(&input)
    }
}

#[async_trait]
impl<C: LlmClient> DaxAssistant for LlmDaxAssistant<C> {
    fn name(&self) -> &str {
        "llm"
    }

    async fn suggest(&self, index: &FieldIndex, candidates: &[FieldId]) -> AssistedDax {
        let mut outcome = AssistedDax::default();
        if candidates.is_empty() {
            return outcome;
        }
        info!(
            model = self.client.model_name(),
            fields = candidates.len(),
            "Requesting DAX assist"
        );

        for chunk in candidates.chunks(self.config.max_fields_per_prompt.max(1)) {
            let body = match self.request_body(index, chunk) {
                Ok(body) => body,
                Err(e) => {
                    outcome
                        .failures
                        .push(AssistFailure::from_error("compilation", &e.into()));
                    continue;
                }
            };
            if self.config.verbose {
                debug!("Compilation prompt input:\n{}", body);
            }

            let request = CompletionRequest::new(COMPILATION_PROMPT, body)
                .with_temperature(self.config.temperature);
            let answers = match complete_with_retry(&self.client, &request, &self.config).await {
                Ok(response) => parse_dax_response(&response),
                Err(e) => Err(e),
            };
            let answers = match answers {
                Ok(answers) => answers,
                Err(e) => {
                    warn!(
                        model = self.client.model_name(),
                        error = %e,
                        fields = chunk.len(),
                        "DAX assist failed, keeping rule-based output"
                    );
                    outcome
                        .failures
                        .push(AssistFailure::from_error("compilation", &e));
                    continue;
                }
            };

            for answer in answers {
                let matches: Vec<FieldId> = chunk
                    .iter()
                    .copied()
                    .filter(|&id| index.get(id).caption.eq_ignore_ascii_case(&answer.caption))
                    .collect();
                let [id] = matches.as_slice() else {
                    debug!(caption = %answer.caption, "Ignoring DAX answer for unknown or ambiguous caption");
                    continue;
                };
                if outcome.accepted.contains_key(id) {
                    continue;
                }
                match self.accept(index, *id, &answer.dax, &answer.powerbi_type) {
                    Ok(validated) => {
                        outcome.accepted.insert(*id, validated);
                    }
                    Err(reason) => {
                        debug!(caption = %answer.caption, reason = %reason, "Rejected DAX answer");
                        outcome.rejected.push((*id, reason));
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLlmClient;
    use crate::models::Field;

    fn index() -> FieldIndex {
        let fields = vec![
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Ratio", "SUM([Sales]) / 2").with_type(PowerBiType::Measure),
            Field::calculated("Orders", "Running", "RUNNING_SUM([Ratio])")
                .with_type(PowerBiType::Measure),
            Field::calculated("Orders", "Flag", "[Sales] > 10").with_type(PowerBiType::Column),
        ];
        FieldIndex::build(&fields).0
    }

    #[tokio::test]
    async fn test_valid_answer_accepted_and_corrected() {
        let index = index();
        let client = MockLlmClient::new(
            r#"[{"caption": "Running", "dax": "CALCULATE(SUM([Ratio]), WINDOW_ALL())", "type": "measure"}]"#,
        );
        let assistant = LlmDaxAssistant::new(client, AssistConfig::default());

        let outcome = assistant.suggest(&index, &[2]).await;
        let accepted = &outcome.accepted[&2];
        assert_eq!(accepted.dax, "CALCULATE([Ratio], WINDOW_ALL())");
        assert_eq!(accepted.notes.len(), 1);
        assert!(outcome.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_and_violations_rejected() {
        let index = index();
        let client = MockLlmClient::new(
            r#"[{"caption": "Running", "dax": "[Ratio]", "type": "column"},
                {"caption": "Flag", "dax": "SUM([Ratio])", "type": "column"},
                {"caption": "Unknown", "dax": "1", "type": "column"}]"#,
        );
        let assistant = LlmDaxAssistant::new(client, AssistConfig::default())
            .with_policy(ValidationPolicy::Reject);

        let outcome = assistant.suggest(&index, &[2, 3]).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome.rejected[0].1.contains("classified measure"));
    }

    #[tokio::test]
    async fn test_non_json_falls_back() {
        let index = index();
        let config = AssistConfig::default().with_max_retries(0);
        let assistant = LlmDaxAssistant::new(MockLlmClient::new("I cannot help with that."), config);

        let outcome = assistant.suggest(&index, &[2]).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, "compilation");
    }
}
