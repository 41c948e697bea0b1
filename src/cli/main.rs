//! `dax-convert`: Tableau calculated fields to Power BI DAX

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use dax_conversion_sdk::cli::commands::check::{CheckArgs, handle_check};
use dax_conversion_sdk::cli::commands::convert::{ConvertArgs, handle_convert};
use dax_conversion_sdk::cli::output::{format_check, format_summary};
use dax_conversion_sdk::models::PowerBiType;

#[derive(Parser)]
#[command(name = "dax-convert", version, about = "Convert Tableau calculated fields to Power BI DAX")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a JSON list of field records
    Convert {
        /// Field metadata JSON file, or - for stdin
        input: String,
        /// TOML or JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Compile workers (0 = available parallelism)
        #[arg(long)]
        workers: Option<usize>,
        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
        /// Fail fields with naked-measure violations instead of correcting them
        #[arg(long)]
        reject_violations: bool,
        /// Enable the LLM assist from CLOUD_PROVIDER / OPENAI_API_KEY
        #[arg(long)]
        assist_from_env: bool,
        /// Exit with status 1 when any field fails
        #[arg(long)]
        strict: bool,
    },
    /// Compile a single formula
    Check {
        formula: String,
        #[arg(long, default_value = "Table")]
        table: String,
        #[arg(long, default_value = "Formula")]
        caption: String,
        /// Field metadata JSON the formula may reference
        #[arg(long)]
        fields: Option<PathBuf>,
        /// Type hint (measure or column)
        #[arg(long)]
        hint: Option<String>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Convert {
            input,
            config,
            workers,
            output,
            pretty,
            reject_violations,
            assist_from_env,
            strict,
        } => {
            let args = ConvertArgs {
                input,
                config,
                workers,
                output,
                pretty,
                reject_violations,
                assist_from_env,
            };
            let result = handle_convert(&args).context("conversion failed")?;
            eprint!("{}", format_summary(&result));
            if strict && !result.is_complete_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Check {
            formula,
            table,
            caption,
            fields,
            hint,
        } => {
            let hint = hint
                .map(|h| h.parse::<PowerBiType>().map_err(anyhow::Error::msg))
                .transpose()?;
            let args = CheckArgs {
                formula,
                table,
                caption,
                fields,
                hint,
            };
            let result = handle_check(&args).context("check failed")?;
            print!("{}", format_check(&result, &args.table, &args.caption));
        }
    }

    Ok(ExitCode::SUCCESS)
}
