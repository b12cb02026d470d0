//! CLI argument definitions for vib.
//!
//! Separated from `main.rs` so that shell completion generation can
//! reference these types.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::finalize::exec::DEFAULT_PLUGIN_DIR;

#[derive(Debug, Parser)]
#[command(name = "vib")]
#[command(about = "Vib - build OCI images from recipes")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory containing executable finalize plugins
    #[arg(long, global = true, env = "VIB_PLUGIN_DIR", default_value = DEFAULT_PLUGIN_DIR)]
    pub plugin_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build an image from a recipe and apply its finalize modules
    ///
    /// The build runs with root effective identity; finalize modules run
    /// with the identity of the invoking user.
    Compile(commands::compile::CompileArgs),

    /// List available finalize plugins
    Plugins,

    /// Print the JSON schema of the recipe format
    Schema(commands::schema::SchemaArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}
