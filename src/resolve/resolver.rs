//! Reference resolution and inlining
//!
//! Rewrites every `[Name]` in a calculated field's formula into a resolved leaf:
//!
//! - source columns become `Column { table, column }`
//! - measures stay as naked `Measure(name)` references
//! - calculated columns are replaced by their own resolved formula (parenthesised)
//! - parameters become `Parameter` leaves carrying their binding
//! - unknown captions become `Unresolved(name)` and are emitted verbatim later
//!
//! Fields are processed in dependency order, so an inlined formula is always already
//! resolved. References that stay inside a dependency cycle are not inlined: the referenced
//! member's own formula is used with every reference back into the cycle replaced by
//! `Blank`, and a direct self-reference becomes `Blank`.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::error::ResolutionWarning;
use super::graph::{DependencyGraph, ParsedFormula};
use crate::classify::{ClassificationContext, RuleClassifier};
use crate::formula::{Expr, FormulaError};
use crate::models::{Field, FieldId, FieldIndex, FieldKey, FieldKind, Lookup, PowerBiType};

/// A calculated field with every reference resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFormula {
    pub id: FieldId,
    pub caption: String,
    pub table: String,
    pub powerbi_type: PowerBiType,
    pub expr: Expr,
}

/// Resolution result for a batch
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub formulas: BTreeMap<FieldId, ResolvedFormula>,
    /// Calculated fields that could not be resolved, with the reason
    pub failed: BTreeMap<FieldId, FormulaError>,
    pub warnings: Vec<ResolutionWarning>,
}

/// Resolves references against a classified index
pub struct Resolver<'a> {
    index: &'a FieldIndex,
    graph: &'a DependencyGraph,
}

impl<'a> Resolver<'a> {
    /// `index` must carry the classified type of every calculated field
    pub fn new(index: &'a FieldIndex, graph: &'a DependencyGraph) -> Self {
        Self { index, graph }
    }

    /// Resolve every calculated field that has a parseable formula
    pub fn resolve_all(&self) -> Resolution {
        let mut resolution = Resolution {
            warnings: self.graph.warnings().to_vec(),
            ..Default::default()
        };
        // resolved expressions by field, filled in dependency order
        let mut resolved: Vec<Option<Expr>> = vec![None; self.index.len()];

        for &id in self.graph.order() {
            let field = self.index.get(id);
            if !field.is_calculated() {
                continue;
            }
            let expr = match self.graph.formula(id) {
                ParsedFormula::Parsed(expr) => expr,
                ParsedFormula::Invalid(err) => {
                    resolution.failed.insert(id, err.clone());
                    continue;
                }
                ParsedFormula::Missing => {
                    resolution
                        .failed
                        .insert(id, FormulaError::new(0, "empty formula"));
                    continue;
                }
                ParsedFormula::NotApplicable => continue,
            };

            let mut warnings = Vec::new();
            let expr = self.pin_lod_dimensions(id, expr);
            let rewritten = expr.transform(&mut |node| match node {
                Expr::Reference { qualifier, name } => Some(self.resolve_reference(
                    id,
                    qualifier.as_deref(),
                    name,
                    &resolved,
                    &mut warnings,
                )),
                _ => None,
            });

            debug!(field = %field.caption, table = %field.table, "Resolved field");
            resolution.warnings.extend(warnings);
            resolution.formulas.insert(
                id,
                ResolvedFormula {
                    id,
                    caption: field.caption.clone(),
                    table: field.table.clone(),
                    powerbi_type: field.powerbi_type.unwrap_or(PowerBiType::Measure),
                    expr: rewritten.clone(),
                },
            );
            resolved[id] = Some(rewritten);
        }

        resolution
    }

    fn resolve_reference(
        &self,
        from: FieldId,
        qualifier: Option<&str>,
        name: &str,
        resolved: &[Option<Expr>],
        warnings: &mut Vec<ResolutionWarning>,
    ) -> Expr {
        let target = match self.graph.target_of(from, qualifier, name) {
            Lookup::Found(t) | Lookup::Ambiguous { chosen: t, .. } => t,
            Lookup::Missing => return Expr::Unresolved(name.to_string()),
        };
        let origin = self.index.get(from);
        let field = self.index.get(target);

        if self.graph.same_cycle(from, target) {
            warn!(
                field = %origin.caption,
                reference = %name,
                "Circular reference broken"
            );
            warnings.push(ResolutionWarning::CycleDetected {
                table: origin.table.clone(),
                field: origin.caption.clone(),
                reference: name.to_string(),
                cycle: self
                    .graph
                    .cycle_members(from)
                    .iter()
                    .map(|m| self.index.get(*m).caption.clone())
                    .collect(),
            });
            if target == from {
                return Expr::Blank;
            }
            return self.cycle_free_expansion(target, resolved);
        }

        self.leaf_for(target, field, resolved)
    }

    /// Turn LOD dimensions naming a calculated column into `Column` leaves
    ///
    /// A calculated column exists in the model, so `ALLEXCEPT` / `REMOVEFILTERS` can name it
    /// directly; inlining it would leave an expression where DAX needs a column.
    fn pin_lod_dimensions(&self, from: FieldId, expr: &Expr) -> Expr {
        expr.transform(&mut |node| match node {
            Expr::Lod {
                kind,
                dimensions,
                body,
            } => Some(Expr::Lod {
                kind: *kind,
                dimensions: dimensions
                    .iter()
                    .map(|d| self.calculated_dimension(from, d).unwrap_or_else(|| d.clone()))
                    .collect(),
                body: Box::new(self.pin_lod_dimensions(from, body)),
            }),
            _ => None,
        })
    }

    fn calculated_dimension(&self, from: FieldId, dimension: &Expr) -> Option<Expr> {
        let Expr::Reference { qualifier, name } = dimension.ungrouped() else {
            return None;
        };
        let target = self.graph.target_of(from, qualifier.as_deref(), name).target()?;
        let field = self.index.get(target);
        let pinned = field.is_calculated()
            && !self.index.is_measure(target)
            && !self.graph.same_cycle(from, target);
        pinned.then(|| Expr::Column {
            table: field.table.clone(),
            column: field.caption.clone(),
        })
    }

    /// Leaf for a reference to a field outside the current cycle
    fn leaf_for(&self, target: FieldId, field: &Field, resolved: &[Option<Expr>]) -> Expr {
        match field.kind {
            FieldKind::Source => Expr::Column {
                table: field.table.clone(),
                column: field.caption.clone(),
            },
            FieldKind::Parameter => Expr::Parameter {
                table: field.table.clone(),
                name: field.caption.clone(),
                binding: field.powerbi_type.unwrap_or(PowerBiType::Column),
            },
            FieldKind::Calculated => {
                if self.index.is_measure(target) {
                    return Expr::Measure(field.caption.clone());
                }
                match &resolved[target] {
                    Some(expr) => expr.clone().grouped(),
                    // the target failed to parse; keep the reference for review
                    None => Expr::Unresolved(field.caption.clone()),
                }
            }
        }
    }

    /// `member`'s formula with references back into its cycle replaced by `Blank`
    fn cycle_free_expansion(&self, member: FieldId, resolved: &[Option<Expr>]) -> Expr {
        let ParsedFormula::Parsed(expr) = self.graph.formula(member) else {
            return Expr::Blank;
        };
        expr.transform(&mut |node| match node {
            Expr::Reference { qualifier, name } => {
                Some(match self.graph.target_of(member, qualifier.as_deref(), name) {
                    Lookup::Missing => Expr::Unresolved(name.clone()),
                    Lookup::Found(t) | Lookup::Ambiguous { chosen: t, .. } => {
                        if self.graph.same_cycle(member, t) {
                            Expr::Blank
                        } else {
                            self.leaf_for(t, self.index.get(t), resolved)
                        }
                    }
                })
            }
            _ => None,
        })
        .grouped()
    }
}

/// Resolve a list of fields on their own
///
/// Types are decided by the rule classifier (which honours `powerbi_type` hints when no
/// measure rule fires). Results are keyed by `(table, caption)`.
pub fn resolve(fields: &[Field]) -> (BTreeMap<FieldKey, ResolvedFormula>, Vec<ResolutionWarning>) {
    let (mut index, _) = FieldIndex::build(fields);
    let graph = DependencyGraph::build(&index);

    RuleClassifier::new()
        .classify_all(ClassificationContext::new(&index, &graph))
        .apply(&mut index);

    let resolution = Resolver::new(&index, &graph).resolve_all();
    let formulas = resolution
        .formulas
        .into_values()
        .map(|f| (FieldKey::new(&f.table, &f.caption), f))
        .collect();
    (formulas, resolution.warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula<'m>(map: &'m BTreeMap<FieldKey, ResolvedFormula>, table: &str, caption: &str) -> &'m Expr {
        &map.get(&FieldKey::new(table, caption))
            .expect("field resolved")
            .expr
    }

    fn column(table: &str, column: &str) -> Expr {
        Expr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    #[test]
    fn test_source_columns_and_measures() {
        let (map, warnings) = resolve(&[
            Field::source("Orders", "Profit"),
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Ratio", "SUM([Profit]) / SUM([Sales])"),
            Field::calculated("Orders", "Running", "TOTAL([Ratio])"),
        ]);

        assert!(warnings.is_empty());
        assert_eq!(
            formula(&map, "Orders", "Running"),
            &Expr::call("TOTAL", vec![Expr::Measure("Ratio".into())])
        );
        let ratio = formula(&map, "Orders", "Ratio");
        assert_eq!(ratio.first_column_table(), Some("Orders"));
        assert!(!ratio.contains_reference());
    }

    #[test]
    fn test_calculated_columns_inlined() {
        let (map, _) = resolve(&[
            Field::source("T", "Price"),
            Field::source("T", "Qty"),
            Field::calculated("T", "Revenue", "[Price] * [Qty]"),
            Field::calculated("T", "Revenue Plus", "[Revenue] + 1"),
        ]);

        let expected = Expr::Binary {
            op: crate::formula::BinaryOp::Add,
            left: Box::new(Expr::Group(Box::new(Expr::Binary {
                op: crate::formula::BinaryOp::Multiply,
                left: Box::new(column("T", "Price")),
                right: Box::new(column("T", "Qty")),
            }))),
            right: Box::new(Expr::Number("1".into())),
        };
        assert_eq!(formula(&map, "T", "Revenue Plus"), &expected);
    }

    #[test]
    fn test_parameters_and_unresolved() {
        let (map, warnings) = resolve(&[
            Field::source("T", "Sales"),
            Field::parameter("Parameters", "Target").with_type(PowerBiType::Measure),
            Field::calculated("T", "Gap", "[Sales] - [Parameters].[Target] + [Ghost]"),
        ]);

        let mut leaves = Vec::new();
        formula(&map, "T", "Gap").walk(&mut |e| match e {
            Expr::Parameter { binding, .. } => leaves.push(format!("param:{binding}")),
            Expr::Unresolved(name) => leaves.push(format!("unresolved:{name}")),
            _ => {}
        });
        assert_eq!(leaves, vec!["param:measure", "unresolved:Ghost"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_two_field_cycle_terminates() {
        let (map, warnings) = resolve(&[
            Field::source("T", "X"),
            Field::calculated("T", "A", "[B] + [X]"),
            Field::calculated("T", "B", "[A] * 2"),
        ]);

        // A references B: B's formula with its reference to A blanked
        let a = formula(&map, "T", "A");
        let mut blanks = 0;
        a.walk(&mut |e| blanks += usize::from(matches!(e, Expr::Blank)));
        assert_eq!(blanks, 1);
        assert!(!a.contains_reference());
        assert!(map.contains_key(&FieldKey::new("T", "B")));
        assert_eq!(
            warnings
                .iter()
                .filter(|w| matches!(w, ResolutionWarning::CycleDetected { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_self_reference_becomes_blank() {
        let (map, warnings) = resolve(&[
            Field::source("T", "X"),
            Field::calculated("T", "S", "[S] + [X]"),
        ]);

        let expected = Expr::Binary {
            op: crate::formula::BinaryOp::Add,
            left: Box::new(Expr::Blank),
            right: Box::new(column("T", "X")),
        };
        assert_eq!(formula(&map, "T", "S"), &expected);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_calculated_lod_dimension_kept_as_column() {
        let (map, warnings) = resolve(&[
            Field::source("Orders", "Customer"),
            Field::source("Orders", "Sales"),
            Field::calculated("Orders", "Customer Upper", "UPPER([Customer])"),
            Field::calculated(
                "Orders",
                "Customer Sales",
                "{FIXED [Customer Upper] : SUM([Sales])} + LEN([Customer Upper])",
            ),
        ]);
        assert!(warnings.is_empty());

        let Expr::Binary { left, right, .. } = formula(&map, "Orders", "Customer Sales") else {
            panic!("expected a binary expression");
        };
        let Expr::Lod { dimensions, .. } = left.as_ref() else {
            panic!("expected an LOD expression");
        };
        assert_eq!(dimensions, &vec![column("Orders", "Customer Upper")]);

        // outside the dimension list the column is still inlined
        let inlined = Expr::call(
            "LEN",
            vec![Expr::call("UPPER", vec![column("Orders", "Customer")])],
        );
        assert_eq!(right.as_ref(), &inlined);
    }

    #[test]
    fn test_invalid_formula_reported() {
        let (index, _) = FieldIndex::build(&[Field::calculated("T", "Broken", "[A] +")]);
        let graph = DependencyGraph::build(&index);
        let resolution = Resolver::new(&index, &graph).resolve_all();

        assert!(resolution.formulas.is_empty());
        assert!(resolution.failed.contains_key(&0));
    }
}
