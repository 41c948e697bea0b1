//! Syntax compiler
//!
//! Turns a [`ResolvedFormula`] into DAX text. Reference forms are fixed by the leaf kind:
//!
//! | Leaf | DAX |
//! |---|---|
//! | source or calculated column | `'Table'[Column]` |
//! | measure | `[Measure]` |
//! | parameter bound to a measure | `[Parameter]` |
//! | parameter bound to a column | `SELECTEDVALUE('Table'[Parameter])` |
//!
//! Every result is checked by the [`NakedMeasureValidator`] before it is returned.

pub mod dax;
pub mod error;
mod functions;
pub mod validate;

pub use dax::{column_ref, measure_ref, quote_table};
pub use error::{CompileError, CompileResult};
pub use validate::{NakedMeasureValidator, Validated, ValidationPolicy, validate_dax};

use tracing::debug;

use crate::models::{CompiledField, FieldIndex};
use crate::resolve::ResolvedFormula;
use dax::Emitter;

/// Compile one resolved field, auto-correcting naked-measure violations
pub fn compile(resolved: &ResolvedFormula, index: &FieldIndex) -> CompileResult<CompiledField> {
    compile_with(resolved, index, ValidationPolicy::default())
}

/// Compile one resolved field under an explicit validation policy
pub fn compile_with(
    resolved: &ResolvedFormula,
    index: &FieldIndex,
    policy: ValidationPolicy,
) -> CompileResult<CompiledField> {
    let mut emitter = Emitter::new(&resolved.table);
    let dax = emitter.emit_arg(&resolved.expr)?;
    let mut notes = emitter.into_notes();

    let validated = validate_dax(&dax, index, policy)?;
    for note in validated.notes {
        if !notes.contains(&note) {
            notes.push(note);
        }
    }

    debug!(
        field = %resolved.caption,
        table = %resolved.table,
        powerbi_type = %resolved.powerbi_type,
        "Compiled field"
    );
    let mut compiled = CompiledField::new(
        &resolved.caption,
        &resolved.table,
        validated.dax,
        resolved.powerbi_type,
    );
    compiled.review_notes = notes;
    Ok(compiled)
}
