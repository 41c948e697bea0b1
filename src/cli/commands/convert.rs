//! Convert command implementation

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::compile::ValidationPolicy;
use crate::convert::{BatchResult, ConversionConfig, ConversionOrchestrator};
use crate::llm::LlmMode;
use crate::models::Field;

use super::load_input;

/// Arguments for the `convert` command
pub struct ConvertArgs {
    /// Field metadata JSON file, or `-` for stdin
    pub input: String,
    /// TOML or JSON configuration file
    pub config: Option<PathBuf>,
    /// Compile workers (overrides the configuration)
    pub workers: Option<usize>,
    /// Write the result here instead of stdout
    pub output: Option<PathBuf>,
    pub pretty: bool,
    /// Fail fields with naked-measure violations instead of correcting them
    pub reject_violations: bool,
    /// Pick the assist provider from CLOUD_PROVIDER / OPENAI_API_KEY
    pub assist_from_env: bool,
}

/// Build the effective configuration from the file and flags
pub fn build_config(args: &ConvertArgs) -> Result<ConversionConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => ConversionConfig::load(path)?,
        None => ConversionConfig::default(),
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.reject_violations {
        config = config.with_validation(ValidationPolicy::Reject);
    }
    if args.assist_from_env && !config.assist.is_enabled() {
        config.assist.llm_mode = LlmMode::from_env();
    }
    Ok(config)
}

/// Run a conversion; the assisted path gets a single-threaded runtime of its own
pub fn run_conversion(fields: &[Field], config: ConversionConfig) -> Result<BatchResult, CliError> {
    if !config.assist.is_enabled() {
        return Ok(ConversionOrchestrator::new(config).convert_with_rules(fields));
    }

    let orchestrator = ConversionOrchestrator::from_config(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    Ok(runtime.block_on(orchestrator.convert(fields)))
}

/// Handle the `convert` command
pub fn handle_convert(args: &ConvertArgs) -> Result<BatchResult, CliError> {
    let content = load_input(&args.input)?;
    let fields: Vec<Field> = serde_json::from_str(&content)
        .map_err(|e| CliError::InvalidArgument(format!("Invalid field metadata: {}", e)))?;
    let config = build_config(args)?;

    let result = run_conversion(&fields, config)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&result)
    } else {
        serde_json::to_string(&result)
    }
    .map_err(|e| CliError::InvalidArgument(format!("Failed to serialize result: {}", e)))?;

    match &args.output {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| CliError::FileWriteError(path.clone(), e.to_string()))?,
        None => println!("{}", json),
    }
    Ok(result)
}
