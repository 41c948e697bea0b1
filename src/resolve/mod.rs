//! Dependency resolver
//!
//! Builds the field dependency graph and rewrites each calculated formula so it references
//! only source columns, measures and parameters.

pub mod error;
pub mod graph;
pub mod resolver;

pub use error::ResolutionWarning;
pub use graph::{DependencyGraph, ParsedFormula, Reference};
pub use resolver::{Resolution, ResolvedFormula, Resolver, resolve};
