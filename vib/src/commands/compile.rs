//! `vib compile`: build a recipe with a container engine.

use crate::command_runner::{CommandRunner, RealCommandRunner};
use crate::finalize::{PluginRegistry, exec};
use crate::orchestrator::Orchestrator;
use crate::privilege::PrivilegeContext;
use anyhow::Result;
use clap::Args;
use nix::unistd::{Gid, Uid};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Args)]
pub struct CompileArgs {
    /// Recipe file, or a directory containing recipe.yml
    #[arg(default_value = "recipe.yml")]
    pub recipe: PathBuf,

    /// Container engine used for the build (docker or podman)
    #[arg(long, short, env = "VIB_RUNTIME")]
    pub runtime: Option<String>,

    /// Effective uid restored after the build [default: current effective uid]
    #[arg(long, env = "SUDO_UID")]
    pub uid: Option<u32>,

    /// Effective gid restored after the build [default: current effective gid]
    #[arg(long, env = "SUDO_GID")]
    pub gid: Option<u32>,
}

impl CompileArgs {
    /// Identity to return to after the build. Under sudo this is the
    /// invoking user rather than root.
    pub fn privileges(&self) -> PrivilegeContext {
        let detected = PrivilegeContext::detect();
        PrivilegeContext {
            is_root: detected.is_root,
            original_uid: self.uid.map(Uid::from_raw).unwrap_or(detected.original_uid),
            original_gid: self.gid.map(Gid::from_raw).unwrap_or(detected.original_gid),
        }
    }
}

pub fn run(args: CompileArgs, plugin_dir: &Path) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(RealCommandRunner);

    let mut registry = PluginRegistry::new();
    let count = exec::register_dir(&mut registry, plugin_dir, Arc::clone(&runner))?;
    debug!(count, dir = %plugin_dir.display(), "Registered finalize plugins");

    let privileges = args.privileges();
    debug!(
        is_root = privileges.is_root,
        uid = privileges.original_uid.as_raw(),
        gid = privileges.original_gid.as_raw(),
        "Resolved original identity"
    );

    let orchestrator = Orchestrator::system(runner, registry);
    orchestrator.compile(
        &args.recipe,
        args.runtime.as_deref().unwrap_or_default(),
        &privileges,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_ids_override_detection() {
        let args = CompileArgs {
            recipe: PathBuf::from("recipe.yml"),
            runtime: Some("podman".to_string()),
            uid: Some(1234),
            gid: Some(5678),
        };
        let ctx = args.privileges();
        assert_eq!(ctx.original_uid.as_raw(), 1234);
        assert_eq!(ctx.original_gid.as_raw(), 5678);
        assert_eq!(ctx.is_root, nix::unistd::geteuid().is_root());
    }

    #[test]
    fn test_ids_default_to_current_identity() {
        let args = CompileArgs {
            recipe: PathBuf::from("recipe.yml"),
            runtime: None,
            uid: None,
            gid: None,
        };
        assert_eq!(args.privileges(), PrivilegeContext::detect());
    }
}
