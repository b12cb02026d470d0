//! `vib plugins`: list finalize plugins found in the plugin directory.

use crate::command_runner::RealCommandRunner;
use crate::finalize::{FinalizePlugin, exec};
use crate::output::Output;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub fn run(plugin_dir: &Path) -> Result<()> {
    let plugins = exec::discover(plugin_dir, Arc::new(RealCommandRunner))?;

    if plugins.is_empty() {
        Output::warning(format!(
            "No finalize plugins found in {}",
            plugin_dir.display()
        ));
        Output::hint("Set --plugin-dir or VIB_PLUGIN_DIR to use another directory");
        return Ok(());
    }

    for plugin in &plugins {
        Output::kv(plugin.module_type(), plugin.program().display().to_string());
    }
    Ok(())
}
