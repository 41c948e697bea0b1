//! Metadata index over the fields of one conversion request
//!
//! Fields are addressed by [`FieldId`] (their position in the index). Caption lookups are
//! case-insensitive, as they are in Tableau.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::field::{Field, FieldKind, PowerBiType};

/// Position of a field in a [`FieldIndex`]
pub type FieldId = usize;

/// `(table, caption)` pair identifying a field in output maps
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub table: String,
    pub caption: String,
}

impl FieldKey {
    pub fn new(table: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            caption: caption.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'[{}]", self.table, self.caption)
    }
}

/// Problem found while indexing the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum InputIssue {
    /// A second field with the same table and caption; the later one is dropped
    DuplicateField { table: String, caption: String },
    /// A source column carrying a formula; the formula is ignored
    FormulaOnSource { table: String, caption: String },
}

impl fmt::Display for InputIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputIssue::DuplicateField { table, caption } => {
                write!(f, "Duplicate field '{}' in table '{}' ignored", caption, table)
            }
            InputIssue::FormulaOnSource { table, caption } => write!(
                f,
                "Source column '{}' in table '{}' carries a formula; formula ignored",
                caption, table
            ),
        }
    }
}

/// Outcome of resolving a caption referenced from a formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(FieldId),
    /// Several tables define the caption and none is the referencing field's own table
    Ambiguous { chosen: FieldId, candidates: usize },
    Missing,
}

impl Lookup {
    pub fn target(self) -> Option<FieldId> {
        match self {
            Lookup::Found(id) | Lookup::Ambiguous { chosen: id, .. } => Some(id),
            Lookup::Missing => None,
        }
    }
}

/// Read-mostly index of the fields in one batch
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    fields: Vec<Field>,
    by_caption: HashMap<String, Vec<FieldId>>,
}

impl FieldIndex {
    /// Build the index, normalising the input as it goes
    ///
    /// - duplicate `(table, caption)` pairs keep the first occurrence
    /// - formulas on source columns are dropped
    /// - source columns are always typed `column`; parameters default to `column` binding
    pub fn build(fields: &[Field]) -> (Self, Vec<InputIssue>) {
        let mut index = FieldIndex::default();
        let mut issues = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for field in fields {
            let key = (field.table.to_lowercase(), field.caption.to_lowercase());
            if !seen.insert(key) {
                issues.push(InputIssue::DuplicateField {
                    table: field.table.clone(),
                    caption: field.caption.clone(),
                });
                continue;
            }

            let mut field = field.clone();
            match field.kind {
                FieldKind::Source => {
                    if field.formula.take().is_some_and(|f| !f.trim().is_empty()) {
                        issues.push(InputIssue::FormulaOnSource {
                            table: field.table.clone(),
                            caption: field.caption.clone(),
                        });
                    }
                    field.powerbi_type = Some(PowerBiType::Column);
                }
                FieldKind::Parameter => {
                    field.powerbi_type = Some(field.powerbi_type.unwrap_or(PowerBiType::Column));
                }
                FieldKind::Calculated => {}
            }

            let id = index.fields.len();
            index
                .by_caption
                .entry(field.caption.to_lowercase())
                .or_default()
                .push(id);
            index.fields.push(field);
        }

        // candidates ordered by table name so ambiguous picks are stable
        for ids in index.by_caption.values_mut() {
            let fields = &index.fields;
            ids.sort_by(|a, b| fields[*a].table.cmp(&fields[*b].table).then(a.cmp(b)));
        }

        (index, issues)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, id: FieldId) -> &Field {
        &self.fields[id]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        0..self.fields.len()
    }

    pub fn key(&self, id: FieldId) -> FieldKey {
        let field = &self.fields[id];
        FieldKey::new(&field.table, &field.caption)
    }

    /// Record the resolved type of a calculated field
    pub fn set_type(&mut self, id: FieldId, powerbi_type: PowerBiType) {
        if self.fields[id].is_calculated() {
            self.fields[id].powerbi_type = Some(powerbi_type);
        }
    }

    /// Resolve a caption referenced from a field in `from_table`
    ///
    /// A qualifier (`[Parameters].[Top N]`) selects the table when it matches one; otherwise
    /// the referencing table wins, then a unique match anywhere, then the first table in
    /// name order.
    pub fn lookup(&self, from_table: &str, qualifier: Option<&str>, caption: &str) -> Lookup {
        let Some(ids) = self.by_caption.get(&caption.to_lowercase()) else {
            return Lookup::Missing;
        };

        let in_table = |table: &str| {
            ids.iter()
                .copied()
                .find(|id| self.fields[*id].table.eq_ignore_ascii_case(table))
        };

        if let Some(id) = qualifier.and_then(in_table) {
            return Lookup::Found(id);
        }
        if let Some(id) = in_table(from_table) {
            return Lookup::Found(id);
        }
        match ids.as_slice() {
            [] => Lookup::Missing,
            [only] => Lookup::Found(*only),
            [first, ..] => Lookup::Ambiguous {
                chosen: *first,
                candidates: ids.len(),
            },
        }
    }

    /// Whether any field with this caption resolves to a measure
    pub fn is_measure_name(&self, caption: &str) -> bool {
        self.by_caption
            .get(&caption.to_lowercase())
            .is_some_and(|ids| ids.iter().any(|id| self.is_measure(*id)))
    }

    /// Calculated fields typed measure and parameters bound to a measure
    pub fn is_measure(&self, id: FieldId) -> bool {
        let field = &self.fields[id];
        field.kind != FieldKind::Source && field.powerbi_type == Some(PowerBiType::Measure)
    }

    /// Whether `table` has a column (source, calculated column or column-bound parameter)
    /// with this caption
    pub fn has_column(&self, table: &str, caption: &str) -> bool {
        self.by_caption
            .get(&caption.to_lowercase())
            .is_some_and(|ids| {
                ids.iter().any(|id| {
                    let field = &self.fields[*id];
                    field.table.eq_ignore_ascii_case(table) && !self.is_measure(*id)
                })
            })
    }

    /// Whether any field lives in a table with this name
    pub fn has_table(&self, table: &str) -> bool {
        self.fields.iter().any(|f| f.table.eq_ignore_ascii_case(table))
    }
}
