//! DAX Conversion SDK - Tableau calculated fields to Power BI DAX
//!
//! Provides:
//! - Field metadata model and per-batch index
//! - Tableau formula lexer and parser
//! - Measure / calculated-column classification (rules, optionally assisted by an LLM)
//! - Dependency resolution with cycle detection
//! - DAX compilation with naked-measure validation
//! - Batch orchestration with per-field error isolation
//!
//! # Example
//!
//! ```rust
//! use dax_conversion_sdk::{Field, PowerBiType, convert};
//!
//! let result = convert(&[
//!     Field::source("Customers", "First"),
//!     Field::source("Customers", "Last"),
//!     Field::calculated("Customers", "Full Name", r#"[First] & " " & [Last]"#),
//! ]);
//! let full = result.get("Customers", "Full Name").unwrap();
//! assert_eq!(full.powerbi_type, PowerBiType::Column);
//! assert_eq!(full.dax, r#"'Customers'[First] & " " & 'Customers'[Last]"#);
//! ```

pub mod classify;
pub mod compile;
pub mod convert;
pub mod formula;
pub mod llm;
pub mod models;
pub mod resolve;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export models
pub use models::{CompiledField, Field, FieldKind, PowerBiType};

// Re-export stage entry points
pub use classify::{Classifier, LlmClassifier, RuleClassifier, classify};
pub use compile::{CompileError, ValidationPolicy, compile, validate_dax};
pub use resolve::resolve;

// Re-export conversion types
pub use convert::{
    BatchResult, CancellationToken, ConversionConfig, ConversionError, ConversionOrchestrator,
    convert, convert_json, convert_with_config,
};
