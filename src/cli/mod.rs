//! Command-line front end for the `dax-convert` binary

pub mod commands;
pub mod error;
pub mod output;

pub use error::CliError;
