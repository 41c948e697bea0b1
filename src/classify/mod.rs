//! Type classifier
//!
//! Decides for every calculated field whether it becomes a Power BI measure or a calculated
//! column. Fields are visited in dependency order so a field that references a measure can
//! inherit measure-ness. Two strategies implement [`Classifier`]:
//!
//! - [`RuleClassifier`]: the deterministic rule set, always available
//! - [`LlmClassifier`]: consults an assist model for fields no rule settles, falling back to
//!   the rules on any failure

pub mod error;
pub mod llm;
pub mod rules;

pub use error::{ClassificationError, ClassificationResult};
pub use llm::LlmClassifier;
pub use rules::{FormulaSignals, RuleClassifier, formula_signals};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::llm::AssistFailure;
use crate::models::{Field, FieldId, FieldIndex, FieldKind, Lookup, PowerBiType};
use crate::resolve::DependencyGraph;

/// Which rule settled a field's type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Aggregation,
    TableCalculation,
    LevelOfDetail,
    MeasureReference,
    CyclicReference,
    ParameterReference,
    /// Assist model answer for a field no rule settled
    Assisted,
    /// Type hint carried by the input
    Hint,
    /// Nothing conclusive; defaults to measure
    Indeterminate,
    RowLevel,
}

/// Type chosen for one calculated field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub powerbi_type: PowerBiType,
    pub rule: Rule,
    /// Why the decision was indeterminate, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Decision {
    pub fn new(powerbi_type: PowerBiType, rule: Rule) -> Self {
        Self {
            powerbi_type,
            rule,
            note: None,
        }
    }

    pub fn indeterminate(note: impl Into<String>) -> Self {
        Self {
            powerbi_type: PowerBiType::Measure,
            rule: Rule::Indeterminate,
            note: Some(note.into()),
        }
    }
}

/// Read-only inputs for a classification pass
#[derive(Debug, Clone, Copy)]
pub struct ClassificationContext<'a> {
    pub index: &'a FieldIndex,
    pub graph: &'a DependencyGraph,
}

impl<'a> ClassificationContext<'a> {
    pub fn new(index: &'a FieldIndex, graph: &'a DependencyGraph) -> Self {
        Self { index, graph }
    }
}

/// Output of a classification pass over a batch
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Decisions for calculated fields
    pub decisions: BTreeMap<FieldId, Decision>,
    /// Fields whose formula was missing or unparseable
    pub errors: Vec<ClassificationError>,
    /// Assist calls that failed and were replaced by the rules
    pub assist_failures: Vec<AssistFailure>,
}

impl Classification {
    pub fn type_of(&self, id: FieldId) -> Option<PowerBiType> {
        self.decisions.get(&id).map(|d| d.powerbi_type)
    }

    /// Write the decided types into the index
    pub fn apply(&self, index: &mut FieldIndex) {
        for (id, decision) in &self.decisions {
            index.set_type(*id, decision.powerbi_type);
        }
    }
}

/// Strategy deciding measure vs column for a batch
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Classify every calculated field in the context
    async fn classify(&self, ctx: ClassificationContext<'_>) -> Classification;
}

/// Classify a single field against the fields it may reference
///
/// Source columns are always `column`; parameters keep their binding (default `column`).
/// `field` is added to `context` when not already present.
pub fn classify(field: &Field, context: &[Field]) -> ClassificationResult<PowerBiType> {
    match field.kind {
        FieldKind::Source => return Ok(PowerBiType::Column),
        FieldKind::Parameter => return Ok(field.powerbi_type.unwrap_or(PowerBiType::Column)),
        FieldKind::Calculated => {}
    }

    let mut fields = context.to_vec();
    let present = context.iter().any(|f| {
        f.table.eq_ignore_ascii_case(&field.table) && f.caption.eq_ignore_ascii_case(&field.caption)
    });
    if !present {
        fields.push(field.clone());
    }

    let (index, _) = FieldIndex::build(&fields);
    let graph = DependencyGraph::build(&index);
    let id = match index.lookup(&field.table, Some(&field.table), &field.caption) {
        Lookup::Found(id) => id,
        _ => {
            return Err(ClassificationError::UnknownField {
                table: field.table.clone(),
                field: field.caption.clone(),
            });
        }
    };

    let classification = RuleClassifier::new().classify_all(ClassificationContext::new(&index, &graph));
    if let Some(err) = classification.errors.into_iter().find(|e| {
        e.field().eq_ignore_ascii_case(&field.caption) && e.table().eq_ignore_ascii_case(&field.table)
    }) {
        return Err(err);
    }
    Ok(classification
        .decisions
        .get(&id)
        .map(|d| d.powerbi_type)
        .unwrap_or(PowerBiType::Measure))
}
