//! CLI command implementations.

pub mod compile;
pub mod completions;
pub mod plugins;
pub mod schema;
