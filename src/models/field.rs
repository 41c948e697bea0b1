//! Field metadata model
//!
//! A [`Field`] is one Tableau field as handed over by the workbook extraction layer: a source
//! column, a calculated field or a parameter, together with the table (datasource) it lives in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::formula::extract_references;

/// Where a field comes from in the Tableau workbook
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// A physical column of the datasource
    #[serde(alias = "column", alias = "source_column")]
    Source,
    /// A calculated field with a formula
    #[serde(alias = "calculation", alias = "calculated_field")]
    Calculated,
    /// A workbook parameter
    Parameter,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Source => write!(f, "source"),
            FieldKind::Calculated => write!(f, "calculated"),
            FieldKind::Parameter => write!(f, "parameter"),
        }
    }
}

/// Power BI object type a field turns into
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PowerBiType {
    /// Aggregate evaluated in filter context, referenced as a naked `[Name]`
    Measure,
    /// Row-level column, referenced as `'Table'[Name]`
    #[serde(alias = "calculated column", alias = "calculated_column")]
    Column,
}

impl PowerBiType {
    pub fn is_measure(self) -> bool {
        matches!(self, PowerBiType::Measure)
    }
}

impl fmt::Display for PowerBiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerBiType::Measure => write!(f, "measure"),
            PowerBiType::Column => write!(f, "column"),
        }
    }
}

impl FromStr for PowerBiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "measure" => Ok(PowerBiType::Measure),
            "column" | "calculated column" | "calculated_column" => Ok(PowerBiType::Column),
            _ => Err(format!("Invalid Power BI type: {}", s)),
        }
    }
}

/// A Tableau field as supplied for one conversion request
///
/// # Example
///
/// ```rust
/// use dax_conversion_sdk::models::{Field, PowerBiType};
///
/// let field = Field::calculated("Orders", "Profit Ratio", "SUM([Profit])/SUM([Sales])");
/// assert_eq!(field.dependencies(), vec!["Profit".to_string(), "Sales".to_string()]);
/// assert_eq!(field.powerbi_type, None::<PowerBiType>);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    /// Display caption, unique within its table
    pub caption: String,
    /// Owning table (Tableau datasource caption)
    #[serde(alias = "datasource")]
    pub table: String,
    /// Source column, calculation or parameter
    #[serde(alias = "role")]
    pub kind: FieldKind,
    /// Raw Tableau formula, absent for source columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Pre-assigned type hint, or the resolved type after classification.
    /// `None` means unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powerbi_type: Option<PowerBiType>,
}

impl Field {
    /// Create a source column
    pub fn source(table: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            table: table.into(),
            kind: FieldKind::Source,
            formula: None,
            powerbi_type: None,
        }
    }

    /// Create a calculated field
    pub fn calculated(
        table: impl Into<String>,
        caption: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        Self {
            caption: caption.into(),
            table: table.into(),
            kind: FieldKind::Calculated,
            formula: Some(formula.into()),
            powerbi_type: None,
        }
    }

    /// Create a parameter bound to a column (referenced through `SELECTEDVALUE`)
    pub fn parameter(table: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            table: table.into(),
            kind: FieldKind::Parameter,
            formula: None,
            powerbi_type: None,
        }
    }

    /// Attach a Power BI type hint
    pub fn with_type(mut self, powerbi_type: PowerBiType) -> Self {
        self.powerbi_type = Some(powerbi_type);
        self
    }

    pub fn is_calculated(&self) -> bool {
        self.kind == FieldKind::Calculated
    }

    pub fn is_parameter(&self) -> bool {
        self.kind == FieldKind::Parameter
    }

    /// Captions referenced by the formula, in order of first appearance
    pub fn dependencies(&self) -> Vec<String> {
        self.formula
            .as_deref()
            .map(extract_references)
            .unwrap_or_default()
    }

    /// The formula, or an empty string when there is none
    pub fn formula_text(&self) -> &str {
        self.formula.as_deref().unwrap_or("")
    }
}

/// A calculated field compiled to DAX
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompiledField {
    pub caption: String,
    pub table: String,
    /// DAX expression (the right-hand side of the measure or column definition)
    pub dax: String,
    #[serde(rename = "type")]
    pub powerbi_type: PowerBiType,
    /// Items a human should look at before the model ships
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
}

impl CompiledField {
    pub fn new(
        caption: impl Into<String>,
        table: impl Into<String>,
        dax: impl Into<String>,
        powerbi_type: PowerBiType,
    ) -> Self {
        Self {
            caption: caption.into(),
            table: table.into(),
            dax: dax.into(),
            powerbi_type,
            review_notes: Vec::new(),
        }
    }

    /// Whether anything in this field was flagged for manual review
    pub fn needs_review(&self) -> bool {
        !self.review_notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_deserialize_with_aliases() {
        let json = r#"[
            {"caption": "Sales", "datasource": "Orders", "role": "source"},
            {"caption": "Margin", "table": "Orders", "kind": "calculated",
             "formula": "[Profit] / [Sales]", "powerbi_type": "measure"},
            {"caption": "Top N", "table": "Parameters", "kind": "parameter"}
        ]"#;
        let fields: Vec<Field> = serde_json::from_str(json).unwrap();

        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].table, "Orders");
        assert_eq!(fields[0].kind, FieldKind::Source);
        assert_eq!(fields[1].powerbi_type, Some(PowerBiType::Measure));
        assert!(fields[2].is_parameter());
    }

    #[test]
    fn test_field_dependencies() {
        let field = Field::calculated("Orders", "Net", "[Sales] - [Discount] + [Sales]");
        assert_eq!(field.dependencies(), vec!["Sales", "Discount"]);
        assert!(Field::source("Orders", "Sales").dependencies().is_empty());
    }

    #[test]
    fn test_powerbi_type_from_str() {
        assert_eq!("Measure".parse::<PowerBiType>(), Ok(PowerBiType::Measure));
        assert_eq!(
            "calculated column".parse::<PowerBiType>(),
            Ok(PowerBiType::Column)
        );
        assert!("dimension".parse::<PowerBiType>().is_err());
    }

    #[test]
    fn test_compiled_field_serializes_type_key() {
        let compiled = CompiledField::new("Margin", "Orders", "[Profit]", PowerBiType::Measure);
        let json = serde_json::to_value(&compiled).unwrap();
        assert_eq!(json["type"], "measure");
        assert!(json.get("review_notes").is_none());
    }
}
