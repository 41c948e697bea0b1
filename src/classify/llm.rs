//! Assist-backed classifier
//!
//! The rule pass runs first. Fields it could only settle by the row-level default, a hint,
//! or the indeterminate fallback are sent to the assist model in batches; valid answers
//! replace those decisions and the rule pass is re-run so measure-ness propagates to
//! dependents. Any assist failure leaves the rule result in place.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::rules::RuleClassifier;
use super::{Classification, ClassificationContext, Classifier, Rule};
use crate::llm::{
    AssistConfig, AssistFailure, CLASSIFICATION_PROMPT, CompletionRequest, LlmClient,
    complete_with_retry, parse_type_response,
};
use crate::models::{FieldId, PowerBiType};
use crate::resolve::ParsedFormula;

#[derive(Debug, Serialize)]
struct PromptField<'a> {
    caption: &'a str,
    table: &'a str,
    formula: &'a str,
}

/// Classifier that asks an LLM about fields the rules leave open
pub struct LlmClassifier<C: LlmClient> {
    client: C,
    config: AssistConfig,
    rules: RuleClassifier,
}

impl<C: LlmClient> LlmClassifier<C> {
    pub fn new(client: C, config: AssistConfig) -> Self {
        Self {
            client,
            config,
            rules: RuleClassifier::new(),
        }
    }

    /// Ask the model about `open` fields, batch by batch
    async fn suggestions(
        &self,
        ctx: ClassificationContext<'_>,
        open: &[FieldId],
    ) -> (HashMap<FieldId, PowerBiType>, Vec<AssistFailure>) {
        let mut suggestions = HashMap::new();
        let mut failures = Vec::new();

        for chunk in open.chunks(self.config.max_fields_per_prompt.max(1)) {
            let prompt_fields: Vec<PromptField<'_>> = chunk
                .iter()
                .map(|&id| {
                    let field = ctx.index.get(id);
                    PromptField {
                        caption: &field.caption,
                        table: &field.table,
                        formula: field.formula_text(),
                    }
                })
                .collect();
            let field_list = match serde_json::to_string_pretty(&prompt_fields) {
                Ok(list) => list,
                Err(e) => {
                    failures.push(AssistFailure::from_error("classification", &e.into()));
                    continue;
                }
            };

            if self.config.verbose {
                debug!("Classification prompt fields:\n{}", field_list);
            }

            let request = CompletionRequest::new(CLASSIFICATION_PROMPT, field_list)
                .with_temperature(self.config.temperature);
            let parsed = match complete_with_retry(&self.client, &request, &self.config).await {
                Ok(response) => parse_type_response(&response),
                Err(e) => Err(e),
            };

            match parsed {
                Ok(answers) => {
                    for answer in answers {
                        let matches: Vec<FieldId> = chunk
                            .iter()
                            .copied()
                            .filter(|&id| {
                                ctx.index.get(id).caption.eq_ignore_ascii_case(&answer.caption)
                            })
                            .collect();
                        let [id] = matches.as_slice() else {
                            debug!(caption = %answer.caption, "Ignoring assist answer for unknown or ambiguous caption");
                            continue;
                        };
                        match PowerBiType::from_str(&answer.powerbi_type) {
                            Ok(powerbi_type) => {
                                suggestions.insert(*id, powerbi_type);
                            }
                            Err(e) => debug!(caption = %answer.caption, error = %e, "Ignoring assist answer"),
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        model = self.client.model_name(),
                        error = %e,
                        fields = chunk.len(),
                        "Classification assist failed, using rule-based types"
                    );
                    failures.push(AssistFailure::from_error("classification", &e));
                }
            }
        }

        (suggestions, failures)
    }
}

#[async_trait]
impl<C: LlmClient> Classifier for LlmClassifier<C> {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, ctx: ClassificationContext<'_>) -> Classification {
        let baseline = self.rules.classify_all(ctx);
        let open: Vec<FieldId> = baseline
            .decisions
            .iter()
            .filter(|(id, d)| {
                matches!(d.rule, Rule::RowLevel | Rule::Hint | Rule::Indeterminate)
                    && matches!(ctx.graph.formula(**id), ParsedFormula::Parsed(_))
            })
            .map(|(id, _)| *id)
            .collect();

        if open.is_empty() {
            return baseline;
        }

        info!(
            model = self.client.model_name(),
            fields = open.len(),
            "Requesting classification assist"
        );
        let (suggestions, failures) = self.suggestions(ctx, &open).await;
        if suggestions.is_empty() {
            return Classification {
                assist_failures: failures,
                ..baseline
            };
        }

        let mut classification = self.rules.classify_with(ctx, &suggestions);
        classification.assist_failures = failures;
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLlmClient;
    use crate::models::{Field, FieldIndex};
    use crate::resolve::DependencyGraph;

    fn fixture() -> (FieldIndex, DependencyGraph) {
        let fields = vec![
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Scaled", "[Sales] * 1.2"),
            Field::calculated("Orders", "Total", "SUM([Sales])"),
            Field::calculated("Orders", "Uses Scaled", "[Scaled] + 1"),
        ];
        let (index, _) = FieldIndex::build(&fields);
        let graph = DependencyGraph::build(&index);
        (index, graph)
    }

    #[tokio::test]
    async fn test_assist_answers_applied_and_propagated() {
        let (index, graph) = fixture();
        let client = MockLlmClient::new(
            r#"```json
[{"caption": "Scaled", "type": "measure"}, {"caption": "Total", "type": "column"}]
```"#,
        );
        let classifier = LlmClassifier::new(client, AssistConfig::default());

        let c = classifier
            .classify(ClassificationContext::new(&index, &graph))
            .await;

        assert_eq!(c.type_of(1), Some(PowerBiType::Measure));
        assert_eq!(c.decisions[&1].rule, Rule::Assisted);
        // aggregation rule wins over the assist answer
        assert_eq!(c.type_of(2), Some(PowerBiType::Measure));
        assert_eq!(c.type_of(3), Some(PowerBiType::Measure));
        assert!(c.assist_failures.is_empty());
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_rules() {
        let (index, graph) = fixture();
        let config = AssistConfig::default().with_max_retries(0);
        let classifier = LlmClassifier::new(MockLlmClient::failing(), config);

        let c = classifier
            .classify(ClassificationContext::new(&index, &graph))
            .await;

        assert_eq!(c.type_of(1), Some(PowerBiType::Column));
        assert_eq!(c.type_of(3), Some(PowerBiType::Column));
        assert_eq!(c.assist_failures.len(), 1);
        assert!(!c.assist_failures[0].timed_out);
    }

    #[tokio::test]
    async fn test_malformed_answers_ignored() {
        let (index, graph) = fixture();
        let config = AssistConfig::default().with_max_retries(0);
        let client = MockLlmClient::new(r#"[{"caption": "Scaled", "type": "dimension"}, {"caption": "Nope", "type": "measure"}]"#);
        let classifier = LlmClassifier::new(client, config);

        let c = classifier
            .classify(ClassificationContext::new(&index, &graph))
            .await;

        assert_eq!(c.type_of(1), Some(PowerBiType::Column));
        assert!(c.assist_failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_recorded() {
        let (index, graph) = fixture();
        let config = AssistConfig::default().with_timeout(2).with_max_retries(0);
        let client = MockLlmClient::new("[]").with_delay(std::time::Duration::from_secs(10));
        let classifier = LlmClassifier::new(client, config);

        let c = classifier
            .classify(ClassificationContext::new(&index, &graph))
            .await;

        assert_eq!(c.assist_failures.len(), 1);
        assert!(c.assist_failures[0].timed_out);
        assert_eq!(c.type_of(1), Some(PowerBiType::Column));
    }
}
