//! Finalize plugins shipped as standalone executables.
//!
//! Every executable file in the plugin directory handles the module type
//! equal to its file name. The plugin runs from the recipe directory and
//! receives a JSON document on stdin:
//!
//! ```json
//! {
//!   "config": { "type": "squash", "level": 3 },
//!   "recipe": { "id": "myos", "containerfile": "Containerfile", ... },
//!   "runtime": "podman",
//!   "is_root": false,
//!   "original_uid": 1000,
//!   "original_gid": 1000
//! }
//! ```
//!
//! A non-zero exit status fails the module.

use super::{FinalizeContext, FinalizePlugin, PluginRegistry};
use crate::command_runner::{CommandRunner, Invocation};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use vib_common::Recipe;

/// Default location of executable plugins.
pub const DEFAULT_PLUGIN_DIR: &str = "/usr/share/vib/plugins";

#[derive(Serialize)]
struct PluginInput<'a> {
    config: &'a Value,
    recipe: &'a Recipe,
    runtime: &'a str,
    is_root: bool,
    original_uid: u32,
    original_gid: u32,
}

pub struct ExecPlugin {
    module_type: String,
    program: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ExecPlugin {
    pub fn new(
        module_type: impl Into<String>,
        program: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            module_type: module_type.into(),
            program: program.into(),
            runner,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl FinalizePlugin for ExecPlugin {
    fn module_type(&self) -> &str {
        &self.module_type
    }

    fn apply(&self, config: &Value, ctx: &FinalizeContext<'_>) -> Result<()> {
        let input = PluginInput {
            config,
            recipe: ctx.recipe,
            runtime: ctx.runtime,
            is_root: ctx.privileges.is_root,
            original_uid: ctx.privileges.original_uid.as_raw(),
            original_gid: ctx.privileges.original_gid.as_raw(),
        };
        let payload = serde_json::to_vec(&input).context("Failed to encode plugin input")?;

        let invocation = Invocation::new(&self.program)
            .current_dir(&ctx.recipe.parent_path)
            .env("VIB_RECIPE_ID", ctx.recipe.id.as_str())
            .env("VIB_RECIPE_DIR", ctx.recipe.parent_path.to_string_lossy())
            .env("VIB_RUNTIME", ctx.runtime);

        debug!(program = %self.program.display(), "Running finalize plugin");
        let status = self.runner.run_with_stdin(&invocation, &payload)?;
        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program.display(), status);
        }
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Find executable plugins in `dir`, sorted by module type.
///
/// A missing directory is not an error: it simply holds no plugins.
pub fn discover(dir: &Path, runner: Arc<dyn CommandRunner>) -> Result<Vec<ExecPlugin>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "Plugin directory does not exist");
        return Ok(Vec::new());
    }

    let mut plugins = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read plugin directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !is_executable(&path) {
            continue;
        }
        plugins.push(ExecPlugin::new(name, &path, Arc::clone(&runner)));
    }

    plugins.sort_by(|a, b| a.module_type.cmp(&b.module_type));
    Ok(plugins)
}

/// Register every plugin found in `dir`. Returns how many were registered.
pub fn register_dir(
    registry: &mut PluginRegistry,
    dir: &Path,
    runner: Arc<dyn CommandRunner>,
) -> Result<usize> {
    let plugins = discover(dir, runner)?;
    let count = plugins.len();
    for plugin in plugins {
        registry.register(Box::new(plugin));
    }
    Ok(count)
}
