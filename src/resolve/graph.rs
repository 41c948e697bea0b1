//! Field dependency graph
//!
//! Each calculated field's formula is parsed once here. The graph has one node per field and an
//! edge from every calculated field to each field its formula references. Strongly connected
//! components (petgraph's `tarjan_scc`) identify cycles, and the component order gives the
//! dependency-first processing order used by the classifier and the resolver.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use super::error::ResolutionWarning;
use crate::formula::{Expr, FormulaError, extract_references, parse_formula};
use crate::models::{FieldId, FieldIndex, Lookup};

/// A reference as written in a formula and what it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub qualifier: Option<String>,
    pub name: String,
    pub lookup: Lookup,
}

/// Parse state of a field's formula
#[derive(Debug, Clone)]
pub enum ParsedFormula {
    /// Not a calculated field
    NotApplicable,
    /// Calculated field without formula text
    Missing,
    Parsed(Expr),
    Invalid(FormulaError),
}

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<FieldId, ()>,
    nodes: Vec<NodeIndex>,
    formulas: Vec<ParsedFormula>,
    references: Vec<Vec<Reference>>,
    component_of: Vec<usize>,
    components: Vec<Vec<FieldId>>,
    cyclic: Vec<bool>,
    order: Vec<FieldId>,
    warnings: Vec<ResolutionWarning>,
}

impl DependencyGraph {
    /// Parse every calculated formula in the index and link references to their targets
    pub fn build(index: &FieldIndex) -> Self {
        let mut graph = DiGraph::with_capacity(index.len(), index.len());
        let nodes: Vec<NodeIndex> = index.ids().map(|id| graph.add_node(id)).collect();
        let mut formulas = Vec::with_capacity(index.len());
        let mut references = Vec::with_capacity(index.len());
        let mut warnings = Vec::new();

        for id in index.ids() {
            let field = index.get(id);
            let text = field.formula_text();
            let parsed = if !field.is_calculated() {
                ParsedFormula::NotApplicable
            } else if text.trim().is_empty() {
                ParsedFormula::Missing
            } else {
                match parse_formula(text) {
                    Ok(expr) => ParsedFormula::Parsed(expr),
                    Err(err) => ParsedFormula::Invalid(err),
                }
            };

            let written = match &parsed {
                ParsedFormula::Parsed(expr) => written_references(expr),
                ParsedFormula::Invalid(_) => extract_references(text)
                    .into_iter()
                    .map(|name| (None, name))
                    .collect(),
                _ => Vec::new(),
            };

            let mut field_refs = Vec::with_capacity(written.len());
            for (qualifier, name) in written {
                let lookup = index.lookup(&field.table, qualifier.as_deref(), &name);
                match lookup {
                    Lookup::Missing => {
                        warnings.push(ResolutionWarning::UnresolvedReference {
                            table: field.table.clone(),
                            field: field.caption.clone(),
                            reference: name.clone(),
                        });
                    }
                    Lookup::Ambiguous { chosen, candidates } => {
                        warnings.push(ResolutionWarning::AmbiguousReference {
                            table: field.table.clone(),
                            field: field.caption.clone(),
                            reference: name.clone(),
                            chosen_table: index.get(chosen).table.clone(),
                            candidates,
                        });
                    }
                    Lookup::Found(_) => {}
                }
                if let Some(target) = lookup.target() {
                    graph.update_edge(nodes[id], nodes[target], ());
                }
                field_refs.push(Reference {
                    qualifier,
                    name,
                    lookup,
                });
            }

            formulas.push(parsed);
            references.push(field_refs);
        }

        // tarjan_scc yields components with dependencies before dependents
        let components: Vec<Vec<FieldId>> = tarjan_scc(&graph)
            .into_iter()
            .map(|scc| {
                let mut members: Vec<FieldId> = scc.into_iter().map(|n| graph[n]).collect();
                members.sort_unstable();
                members
            })
            .collect();

        let mut component_of = vec![0; index.len()];
        let mut cyclic = vec![false; index.len()];
        let mut order = Vec::with_capacity(index.len());
        for (c, members) in components.iter().enumerate() {
            let is_cycle = members.len() > 1
                || members
                    .first()
                    .is_some_and(|m| graph.contains_edge(nodes[*m], nodes[*m]));
            for &member in members {
                component_of[member] = c;
                cyclic[member] = is_cycle;
                order.push(member);
            }
            if is_cycle {
                debug!(
                    members = ?members.iter().map(|m| index.get(*m).caption.as_str()).collect::<Vec<_>>(),
                    "Dependency cycle detected"
                );
            }
        }

        DependencyGraph {
            graph,
            nodes,
            formulas,
            references,
            component_of,
            components,
            cyclic,
            order,
            warnings,
        }
    }

    /// Field ids with every field after the fields it depends on (cycle members adjacent)
    pub fn order(&self) -> &[FieldId] {
        &self.order
    }

    pub fn formula(&self, id: FieldId) -> &ParsedFormula {
        &self.formulas[id]
    }

    pub fn references(&self, id: FieldId) -> &[Reference] {
        &self.references[id]
    }

    /// Target of a reference written in `id`'s formula
    pub fn target_of(&self, id: FieldId, qualifier: Option<&str>, name: &str) -> Lookup {
        self.references[id]
            .iter()
            .find(|r| r.name == name && r.qualifier.as_deref() == qualifier)
            .map(|r| r.lookup)
            .unwrap_or(Lookup::Missing)
    }

    /// Whether the field takes part in a dependency cycle (including a self-reference)
    pub fn is_cyclic(&self, id: FieldId) -> bool {
        self.cyclic[id]
    }

    /// Whether an edge between two fields stays within one cycle
    pub fn same_cycle(&self, a: FieldId, b: FieldId) -> bool {
        self.cyclic[a] && self.component_of[a] == self.component_of[b]
    }

    /// Members of the cycle `id` belongs to, in id order
    pub fn cycle_members(&self, id: FieldId) -> &[FieldId] {
        &self.components[self.component_of[id]]
    }

    /// Whether `from` references `to` directly
    pub fn depends_on(&self, from: FieldId, to: FieldId) -> bool {
        self.graph.contains_edge(self.nodes[from], self.nodes[to])
    }

    /// Unresolved and ambiguous references found while linking
    pub fn warnings(&self) -> &[ResolutionWarning] {
        &self.warnings
    }
}

/// `(qualifier, name)` pairs in order of first appearance
fn written_references(expr: &Expr) -> Vec<(Option<String>, String)> {
    let mut refs: Vec<(Option<String>, String)> = Vec::new();
    expr.walk(&mut |e| {
        if let Expr::Reference { qualifier, name } = e {
            let entry = (qualifier.clone(), name.clone());
            if !refs.contains(&entry) {
                refs.push(entry);
            }
        }
    });
    refs
}
