//! `vib schema`: JSON schema of the recipe format.

use anyhow::{Context, Result};
use clap::Args;
use schemars::schema_for;
use std::fs;
use std::path::PathBuf;
use vib_common::Recipe;

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: SchemaArgs) -> Result<()> {
    let schema = schema_for!(Recipe);
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;

    match args.output {
        Some(path) => {
            fs::write(&path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}
