//! Conversion orchestrator
//!
//! Runs one batch through indexing, classification, resolution and compilation. Every
//! problem is scoped to the field it concerns and collected into the [`BatchResult`]; nothing
//! short of malformed input stops the batch.

use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use super::assist::{AssistedDax, DaxAssistant, LlmDaxAssistant};
use super::cancel::CancellationToken;
use super::config::ConversionConfig;
use super::error::{ConversionError, ConversionResult};
use super::result::{BatchResult, BatchWarning, ErrorKind, FieldError, WarningKind};
use crate::classify::{
    Classification, ClassificationContext, Classifier, LlmClassifier, RuleClassifier,
};
use crate::compile::{CompileError, CompileResult, compile_with};
use crate::llm::OpenAiClient;
use crate::models::{CompiledField, Field, FieldId, FieldIndex, InputIssue, PowerBiType};
use crate::resolve::{DependencyGraph, Resolution, Resolver};

/// Review note attached to DAX taken from the assist model
const ASSISTED_NOTE: &str = "DAX generated by the assist model; verify before publishing";

/// Runs conversion batches with an injected classification strategy
pub struct ConversionOrchestrator {
    classifier: Box<dyn Classifier>,
    assistant: Option<Box<dyn DaxAssistant>>,
    config: ConversionConfig,
    token: CancellationToken,
}

/// Per-batch state between the stages
struct Batch {
    index: FieldIndex,
    graph: DependencyGraph,
    result: BatchResult,
}

impl ConversionOrchestrator {
    /// Orchestrator using the rule classifier and no assist
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            classifier: Box::new(RuleClassifier::new()),
            assistant: None,
            config,
            token: CancellationToken::new(),
        }
    }

    /// Orchestrator wired from the configuration
    ///
    /// When the assist is enabled, an OpenAI / Azure OpenAI client is built for each stage in
    /// the configured scope. Fails when the API key variable is not set.
    pub fn from_config(config: ConversionConfig) -> ConversionResult<Self> {
        let assist = config.assist.clone();
        let mut orchestrator = Self::new(config);
        if !assist.is_enabled() {
            return Ok(orchestrator);
        }

        let client = || {
            OpenAiClient::from_mode(&assist.llm_mode)
                .map(|c| c.with_timeout(assist.timeout_seconds))
                .map_err(|e| ConversionError::Config(e.user_message()))
        };
        if assist.scope.classification() {
            orchestrator = orchestrator.with_classifier(LlmClassifier::new(client()?, assist.clone()));
        }
        if assist.scope.compilation() {
            let policy = orchestrator.config.validation;
            orchestrator = orchestrator
                .with_assistant(LlmDaxAssistant::new(client()?, assist.clone()).with_policy(policy));
        }
        Ok(orchestrator)
    }

    /// Replace the classification strategy
    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Consult `assistant` for fields the rules could not compile cleanly
    pub fn with_assistant(mut self, assistant: impl DaxAssistant + 'static) -> Self {
        self.assistant = Some(Box::new(assistant));
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Token that cancels batches run by this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert a batch with the configured classifier and assistant
    pub async fn convert(&self, fields: &[Field]) -> BatchResult {
        let start = Instant::now();
        info!(
            fields = fields.len(),
            classifier = self.classifier.name(),
            "Starting conversion"
        );

        let mut batch = Batch::index(fields);
        let classification = self
            .classifier
            .classify(ClassificationContext::new(&batch.index, &batch.graph))
            .await;
        let outcomes = self.resolve_and_compile(&mut batch, classification);
        let outcomes = match &self.assistant {
            Some(assistant) if !self.token.is_cancelled() => {
                let candidates = assist_candidates(&outcomes);
                if candidates.is_empty() {
                    outcomes
                } else {
                    let assisted = assistant.suggest(&batch.index, &candidates).await;
                    merge_assisted(&mut batch, outcomes, assisted)
                }
            }
            _ => outcomes,
        };

        self.finish(batch, outcomes, start)
    }

    /// Convert a batch on the calling thread's terms: rule classification, no assist
    ///
    /// The injected classifier and assistant are not consulted.
    pub fn convert_with_rules(&self, fields: &[Field]) -> BatchResult {
        let start = Instant::now();
        info!(fields = fields.len(), classifier = "rules", "Starting conversion");

        let mut batch = Batch::index(fields);
        let classification =
            RuleClassifier::new().classify_all(ClassificationContext::new(&batch.index, &batch.graph));
        let outcomes = self.resolve_and_compile(&mut batch, classification);
        self.finish(batch, outcomes, start)
    }

    fn resolve_and_compile(&self, batch: &mut Batch, classification: Classification) -> Vec<Outcome> {
        batch.record_classification(&classification);
        classification.apply(&mut batch.index);

        let resolution = Resolver::new(&batch.index, &batch.graph).resolve_all();
        batch.record_resolution(&resolution);
        self.compile_all(&batch.index, &resolution)
    }

    /// Compile every resolved field, on a worker pool when more than one worker is configured
    fn compile_all(&self, index: &FieldIndex, resolution: &Resolution) -> Vec<Outcome> {
        let _span = info_span!("compile", fields = resolution.formulas.len()).entered();
        let policy = self.config.validation;
        let token = &self.token;
        let compile_one = |id: FieldId| -> Outcome {
            if token.is_cancelled() {
                return Outcome::Cancelled(id);
            }
            let resolved = &resolution.formulas[&id];
            Outcome::Compiled(id, compile_with(resolved, index, policy))
        };
        let ids: Vec<FieldId> = resolution.formulas.keys().copied().collect();

        let workers = self.config.effective_workers();
        if workers <= 1 || ids.len() <= 1 {
            return ids.into_iter().map(compile_one).collect();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| ids.par_iter().map(|id| compile_one(*id)).collect()),
            Err(e) => {
                warn!(workers, error = %e, "Could not start compile workers, compiling sequentially");
                ids.into_iter().map(compile_one).collect()
            }
        }
    }

    fn finish(&self, batch: Batch, outcomes: Vec<Outcome>, start: Instant) -> BatchResult {
        let Batch { index, mut result, .. } = batch;

        for outcome in outcomes {
            match outcome {
                Outcome::Compiled(_, Ok(compiled)) => result.compiled.push(compiled),
                Outcome::Compiled(id, Err(err)) => {
                    let field = index.get(id);
                    debug!(field = %field.caption, error = %err, "Field failed to compile");
                    result
                        .errors
                        .push(FieldError::compile(&field.table, &field.caption, &err));
                }
                Outcome::Cancelled(id) => {
                    let field = index.get(id);
                    result.cancelled = true;
                    result.errors.push(FieldError::new(
                        &field.table,
                        &field.caption,
                        ErrorKind::Cancelled,
                        "Batch cancelled before this field was compiled",
                    ));
                }
            }
        }

        let result = result.finalize();
        info!(
            compiled = result.success_count,
            failed = result.failure_count,
            warnings = result.warnings.len(),
            cancelled = result.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Conversion finished"
        );
        result
    }
}

/// Compilation result for one field
#[derive(Debug)]
enum Outcome {
    Compiled(FieldId, CompileResult<CompiledField>),
    Cancelled(FieldId),
}

impl Batch {
    fn index(fields: &[Field]) -> Self {
        let (index, issues) = FieldIndex::build(fields);
        let graph = DependencyGraph::build(&index);
        let mut result = BatchResult::default();

        for issue in &issues {
            match issue {
                InputIssue::DuplicateField { table, caption } => {
                    result.errors.push(FieldError::new(
                        table,
                        caption,
                        ErrorKind::InvalidInput,
                        issue.to_string(),
                    ));
                }
                InputIssue::FormulaOnSource { .. } => result.warnings.push(issue.into()),
            }
        }
        Self {
            index,
            graph,
            result,
        }
    }

    fn record_classification(&mut self, classification: &Classification) {
        let mut failed = BTreeSet::new();
        for err in &classification.errors {
            failed.insert((err.table().to_string(), err.field().to_string()));
            self.result.errors.push(FieldError::classification(err));
        }
        for (id, decision) in &classification.decisions {
            let field = self.index.get(*id);
            if failed.contains(&(field.table.clone(), field.caption.clone())) {
                continue;
            }
            if let Some(note) = &decision.note {
                self.result.warnings.push(BatchWarning::field(
                    &field.table,
                    &field.caption,
                    WarningKind::Classification,
                    format!("Classified as measure by default: {}", note),
                ));
            }
        }
        for failure in &classification.assist_failures {
            self.result.warnings.push(failure.into());
        }
    }

    fn record_resolution(&mut self, resolution: &Resolution) {
        self.result
            .warnings
            .extend(resolution.warnings.iter().map(BatchWarning::from));

        // fields already reported by classification get a single entry
        let reported: BTreeSet<(String, String)> = self
            .result
            .errors
            .iter()
            .map(|e| (e.table.clone(), e.caption.clone()))
            .collect();
        for (id, err) in &resolution.failed {
            let field = self.index.get(*id);
            if reported.contains(&(field.table.clone(), field.caption.clone())) {
                continue;
            }
            self.result.errors.push(FieldError::new(
                &field.table,
                &field.caption,
                ErrorKind::Resolution,
                format!("Formula could not be parsed: {}", err),
            ));
        }
    }
}

/// Fields worth offering to the assist: unsupported or malformed calls, or output with notes
fn assist_candidates(outcomes: &[Outcome]) -> Vec<FieldId> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Outcome::Compiled(
                id,
                Err(CompileError::UnsupportedFunction { .. } | CompileError::InvalidArguments { .. }),
            ) => Some(*id),
            Outcome::Compiled(id, Ok(compiled)) if compiled.needs_review() => Some(*id),
            _ => None,
        })
        .collect()
}

fn merge_assisted(batch: &mut Batch, outcomes: Vec<Outcome>, assisted: AssistedDax) -> Vec<Outcome> {
    for failure in &assisted.failures {
        batch.result.warnings.push(failure.into());
    }
    for (id, reason) in &assisted.rejected {
        let field = batch.index.get(*id);
        batch.result.warnings.push(BatchWarning::field(
            &field.table,
            &field.caption,
            WarningKind::AssistFallback,
            format!("Assist DAX rejected: {}", reason),
        ));
    }

    let mut accepted = assisted.accepted;
    outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Outcome::Compiled(id, previous) => match accepted.remove(&id) {
                Some(validated) => {
                    let field = batch.index.get(id);
                    let powerbi_type = match &previous {
                        Ok(compiled) => compiled.powerbi_type,
                        Err(_) => field.powerbi_type.unwrap_or(PowerBiType::Measure),
                    };
                    let mut compiled =
                        CompiledField::new(&field.caption, &field.table, validated.dax, powerbi_type);
                    compiled.review_notes.push(ASSISTED_NOTE.to_string());
                    compiled.review_notes.extend(validated.notes);
                    Outcome::Compiled(id, Ok(compiled))
                }
                None => Outcome::Compiled(id, previous),
            },
            cancelled => cancelled,
        })
        .collect()
}
