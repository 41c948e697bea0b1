//! Models module
//!
//! Field metadata consumed from the workbook extraction layer, the per-batch metadata index,
//! and the compiled output handed to the packaging layer.

pub mod field;
pub mod index;

pub use field::{CompiledField, Field, FieldKind, PowerBiType};
pub use index::{FieldId, FieldIndex, FieldKey, InputIssue, Lookup};
