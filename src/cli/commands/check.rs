//! Check command implementation: compile one formula against optional context fields

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::convert::{BatchResult, ConversionConfig, ConversionOrchestrator};
use crate::models::{Field, PowerBiType};

use super::load_input;

/// Arguments for the `check` command
pub struct CheckArgs {
    pub formula: String,
    pub table: String,
    pub caption: String,
    /// Field metadata JSON the formula may reference
    pub fields: Option<PathBuf>,
    pub hint: Option<PowerBiType>,
}

/// Handle the `check` command
pub fn handle_check(args: &CheckArgs) -> Result<BatchResult, CliError> {
    let mut fields: Vec<Field> = match &args.fields {
        Some(path) => {
            let content = load_input(&path.display().to_string())?;
            serde_json::from_str(&content)
                .map_err(|e| CliError::InvalidArgument(format!("Invalid field metadata: {}", e)))?
        }
        None => Vec::new(),
    };

    let already_present = fields.iter().any(|f| {
        f.table.eq_ignore_ascii_case(&args.table) && f.caption.eq_ignore_ascii_case(&args.caption)
    });
    if already_present {
        return Err(CliError::InvalidArgument(format!(
            "Field '{}' already exists in table '{}'",
            args.caption, args.table
        )));
    }

    let mut field = Field::calculated(&args.table, &args.caption, &args.formula);
    field.powerbi_type = args.hint;
    fields.push(field);

    let config = ConversionConfig::default().with_workers(1);
    Ok(ConversionOrchestrator::new(config).convert_with_rules(&fields))
}
