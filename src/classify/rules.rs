//! Deterministic classification rules
//!
//! First matching rule wins:
//!
//! 1. aggregation function → measure
//! 2. table calculation → measure
//! 3. LOD expression → measure
//! 4. reference to a measure (or to a field on the same dependency cycle) → measure
//! 5. reference to a parameter → measure
//! 6. assist answer, then input hint, when present
//! 7. anything inconclusive (unknown function, unresolved reference, no usable formula) →
//!    measure
//! 8. otherwise the formula is row-level → column

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::error::ClassificationError;
use super::{Classification, ClassificationContext, Classifier, Decision, Rule};
use crate::formula::{Expr, FunctionClass, classify_function};
use crate::models::{FieldId, FieldKind, PowerBiType};
use crate::resolve::ParsedFormula;

/// Measure signals found in one formula
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaSignals {
    /// First aggregation function, if any
    pub aggregation: Option<String>,
    /// First table calculation, if any
    pub table_calculation: Option<String>,
    pub lod: bool,
    pub unknown_functions: Vec<String>,
}

/// Scan a formula for aggregation, table calculation and LOD usage
pub fn formula_signals(expr: &Expr) -> FormulaSignals {
    let mut signals = FormulaSignals::default();
    expr.walk(&mut |e| match e {
        Expr::Call { name, args } => match classify_function(name, args.len()) {
            FunctionClass::Aggregate => {
                signals.aggregation.get_or_insert_with(|| name.clone());
            }
            FunctionClass::TableCalculation => {
                signals.table_calculation.get_or_insert_with(|| name.clone());
            }
            FunctionClass::Unknown => {
                if !signals.unknown_functions.contains(name) {
                    signals.unknown_functions.push(name.clone());
                }
            }
            FunctionClass::RowLevel => {}
        },
        Expr::Lod { .. } => signals.lod = true,
        _ => {}
    });
    signals
}

/// Rule-based classifier
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify every calculated field in dependency order
    pub fn classify_all(&self, ctx: ClassificationContext<'_>) -> Classification {
        self.classify_with(ctx, &HashMap::new())
    }

    /// Classify with assist answers for fields the rules leave open
    ///
    /// Suggestions never override rules 1 to 5, so a suggested `column` for a field that
    /// aggregates is ignored.
    pub fn classify_with(
        &self,
        ctx: ClassificationContext<'_>,
        suggestions: &HashMap<FieldId, PowerBiType>,
    ) -> Classification {
        let index = ctx.index;
        let graph = ctx.graph;
        let mut types: Vec<Option<PowerBiType>> = index
            .fields()
            .iter()
            .map(|f| match f.kind {
                FieldKind::Calculated => None,
                _ => f.powerbi_type,
            })
            .collect();
        let mut classification = Classification::default();

        for &id in graph.order() {
            let field = index.get(id);
            if !field.is_calculated() {
                continue;
            }

            let decision = match graph.formula(id) {
                ParsedFormula::Missing => {
                    classification.errors.push(ClassificationError::MissingFormula {
                        table: field.table.clone(),
                        field: field.caption.clone(),
                    });
                    Decision::indeterminate("calculated field has no formula")
                }
                ParsedFormula::Invalid(err) => {
                    classification.errors.push(ClassificationError::Unparseable {
                        table: field.table.clone(),
                        field: field.caption.clone(),
                        source: err.clone(),
                    });
                    Decision::indeterminate(format!("formula could not be parsed: {}", err))
                }
                ParsedFormula::Parsed(expr) => {
                    let signal = self.measure_signal(ctx, id, expr, &types);
                    match signal {
                        Some(rule) => Decision::new(PowerBiType::Measure, rule),
                        None => self.fallback_decision(ctx, id, expr, suggestions),
                    }
                }
                ParsedFormula::NotApplicable => continue,
            };

            debug!(
                field = %field.caption,
                table = %field.table,
                powerbi_type = %decision.powerbi_type,
                rule = ?decision.rule,
                "Classified field"
            );
            types[id] = Some(decision.powerbi_type);
            classification.decisions.insert(id, decision);
        }

        classification
    }

    /// Rules 1 to 5
    fn measure_signal(
        &self,
        ctx: ClassificationContext<'_>,
        id: FieldId,
        expr: &Expr,
        types: &[Option<PowerBiType>],
    ) -> Option<Rule> {
        let signals = formula_signals(expr);
        if signals.aggregation.is_some() {
            return Some(Rule::Aggregation);
        }
        if signals.table_calculation.is_some() {
            return Some(Rule::TableCalculation);
        }
        if signals.lod {
            return Some(Rule::LevelOfDetail);
        }

        let targets: Vec<FieldId> = ctx
            .graph
            .references(id)
            .iter()
            .filter_map(|r| r.lookup.target())
            .collect();

        if targets.iter().any(|&t| {
            ctx.index.get(t).is_calculated() && types[t] == Some(PowerBiType::Measure)
        }) {
            return Some(Rule::MeasureReference);
        }
        if targets.iter().any(|&t| ctx.graph.same_cycle(id, t)) {
            return Some(Rule::CyclicReference);
        }
        if targets.iter().any(|&t| ctx.index.get(t).is_parameter()) {
            return Some(Rule::ParameterReference);
        }
        None
    }

    /// Rules 6 to 8
    fn fallback_decision(
        &self,
        ctx: ClassificationContext<'_>,
        id: FieldId,
        expr: &Expr,
        suggestions: &HashMap<FieldId, PowerBiType>,
    ) -> Decision {
        if let Some(suggested) = suggestions.get(&id) {
            return Decision::new(*suggested, Rule::Assisted);
        }
        if let Some(hint) = ctx.index.get(id).powerbi_type {
            return Decision::new(hint, Rule::Hint);
        }

        let signals = formula_signals(expr);
        if let Some(name) = signals.unknown_functions.first() {
            return Decision::indeterminate(format!("unknown function {}", name));
        }
        let unresolved: Vec<&str> = ctx
            .graph
            .references(id)
            .iter()
            .filter(|r| r.lookup.target().is_none())
            .map(|r| r.name.as_str())
            .collect();
        if !unresolved.is_empty() {
            return Decision::indeterminate(format!(
                "unresolved reference [{}]",
                unresolved.join("], [")
            ));
        }

        Decision::new(PowerBiType::Column, Rule::RowLevel)
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    async fn classify(&self, ctx: ClassificationContext<'_>) -> Classification {
        self.classify_all(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse_formula;
    use crate::models::{Field, FieldIndex};
    use crate::resolve::DependencyGraph;

    fn run(fields: Vec<Field>) -> (FieldIndex, Classification) {
        let (index, _) = FieldIndex::build(&fields);
        let graph = DependencyGraph::build(&index);
        let classification = RuleClassifier::new().classify_all(ClassificationContext::new(&index, &graph));
        (index, classification)
    }

    fn decision(index: &FieldIndex, c: &Classification, caption: &str) -> Decision {
        let id = index
            .ids()
            .find(|id| index.get(*id).caption == caption)
            .expect("caption present");
        c.decisions.get(&id).cloned().expect("decision present")
    }

    #[test]
    fn test_formula_signals() {
        let expr = parse_formula("IF SUM([A]) > 0 THEN WINDOW_AVG(SUM([A])) ELSE FOO([B]) END")
            .unwrap();
        let signals = formula_signals(&expr);
        assert_eq!(signals.aggregation.as_deref(), Some("SUM"));
        assert_eq!(signals.table_calculation.as_deref(), Some("WINDOW_AVG"));
        assert!(!signals.lod);
        assert_eq!(signals.unknown_functions, vec!["FOO".to_string()]);
    }

    #[test]
    fn test_rules_in_order() {
        let (index, c) = run(vec![
            Field::source("Orders", "Profit"),
            Field::source("Orders", "Sales"),
            Field::source("Orders", "Region"),
            Field::parameter("Parameters", "Target"),
            Field::calculated("Orders", "Ratio", "SUM([Profit])/SUM([Sales])"),
            Field::calculated("Orders", "Share", "TOTAL([Sales])"),
            Field::calculated("Orders", "Regional", "{FIXED [Region] : SUM([Sales])}"),
            Field::calculated("Orders", "Ratio x2", "[Ratio] * 2"),
            Field::calculated("Orders", "Over Target", "[Sales] > [Target]"),
            Field::calculated("Orders", "Net", "[Sales] - [Profit]"),
            Field::calculated("Orders", "Mystery", "REGEXP_MATCH([Region], 'a')"),
            Field::calculated("Orders", "Ghostly", "[Ghost] + 1"),
        ]);

        assert_eq!(decision(&index, &c, "Ratio").rule, Rule::Aggregation);
        assert_eq!(decision(&index, &c, "Share").rule, Rule::TableCalculation);
        assert_eq!(decision(&index, &c, "Regional").rule, Rule::LevelOfDetail);
        assert_eq!(decision(&index, &c, "Ratio x2").rule, Rule::MeasureReference);
        assert_eq!(
            decision(&index, &c, "Over Target").rule,
            Rule::ParameterReference
        );

        let net = decision(&index, &c, "Net");
        assert_eq!(net.powerbi_type, PowerBiType::Column);
        assert_eq!(net.rule, Rule::RowLevel);

        let mystery = decision(&index, &c, "Mystery");
        assert_eq!(mystery.powerbi_type, PowerBiType::Measure);
        assert_eq!(mystery.rule, Rule::Indeterminate);
        assert_eq!(decision(&index, &c, "Ghostly").rule, Rule::Indeterminate);
        assert!(c.errors.is_empty());
    }

    #[test]
    fn test_measure_inheritance_through_chain() {
        let (index, c) = run(vec![
            Field::calculated("T", "C", "[B] + 1"),
            Field::calculated("T", "B", "[A] * 2"),
            Field::calculated("T", "A", "AVG([X])"),
            Field::source("T", "X"),
        ]);

        for caption in ["A", "B", "C"] {
            assert_eq!(
                decision(&index, &c, caption).powerbi_type,
                PowerBiType::Measure,
                "{caption} should be a measure"
            );
        }
    }

    #[test]
    fn test_cycle_members_are_measures() {
        let (index, c) = run(vec![
            Field::source("T", "X"),
            Field::calculated("T", "A", "[B] + [X]"),
            Field::calculated("T", "B", "[A] + 1"),
            Field::calculated("T", "S", "[S] + 1"),
        ]);

        assert_eq!(decision(&index, &c, "A").rule, Rule::CyclicReference);
        assert_eq!(decision(&index, &c, "B").powerbi_type, PowerBiType::Measure);
        assert_eq!(decision(&index, &c, "S").powerbi_type, PowerBiType::Measure);
    }

    #[test]
    fn test_hint_only_without_measure_signal() {
        let (index, c) = run(vec![
            Field::source("T", "X"),
            Field::calculated("T", "Hinted", "[X] * 2").with_type(PowerBiType::Measure),
            Field::calculated("T", "Wrong Hint", "SUM([X])").with_type(PowerBiType::Column),
        ]);

        let hinted = decision(&index, &c, "Hinted");
        assert_eq!(hinted.rule, Rule::Hint);
        assert_eq!(hinted.powerbi_type, PowerBiType::Measure);
        assert_eq!(
            decision(&index, &c, "Wrong Hint").powerbi_type,
            PowerBiType::Measure
        );
    }

    #[test]
    fn test_errors_default_to_measure() {
        let mut empty = Field::calculated("T", "Empty", "");
        empty.formula = None;
        let (index, c) = run(vec![
            Field::source("T", "X"),
            Field::calculated("T", "Broken", "[X] +"),
            empty,
        ]);

        assert_eq!(c.errors.len(), 2);
        assert_eq!(decision(&index, &c, "Broken").powerbi_type, PowerBiType::Measure);
        assert_eq!(decision(&index, &c, "Empty").powerbi_type, PowerBiType::Measure);
    }

    #[test]
    fn test_suggestions_fill_open_fields_only() {
        let fields = vec![
            Field::source("T", "X"),
            Field::calculated("T", "Row", "[X] * 2"),
            Field::calculated("T", "Agg", "SUM([X])"),
            Field::calculated("T", "Uses Row", "[Row] + 1"),
        ];
        let (index, _) = FieldIndex::build(&fields);
        let graph = DependencyGraph::build(&index);
        let suggestions = HashMap::from([
            (1, PowerBiType::Measure),
            (2, PowerBiType::Column),
        ]);

        let c = RuleClassifier::new()
            .classify_with(ClassificationContext::new(&index, &graph), &suggestions);

        assert_eq!(c.type_of(1), Some(PowerBiType::Measure));
        assert_eq!(decision(&index, &c, "Row").rule, Rule::Assisted);
        assert_eq!(c.type_of(2), Some(PowerBiType::Measure));
        // inherits the assisted measure
        assert_eq!(c.type_of(3), Some(PowerBiType::Measure));
    }
}
