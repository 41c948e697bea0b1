//! CLI error type

use std::path::PathBuf;

use thiserror::Error;

use crate::convert::ConversionError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("Failed to write {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Async runtime error: {0}")]
    Runtime(String),
}
