//! Container build engines.
//!
//! Every supported engine takes the same `build` invocation and differs only
//! in which executable runs it:
//!
//! ```text
//! <engine> build -t localhost/<id> -f <containerfile> .
//! ```
//!
//! run from the recipe directory with stdout/stderr inherited.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::VibError;
use crate::output::Output;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};
use vib_common::Recipe;

/// Build engine selected by name at invocation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    Docker,
    Podman,
    /// Recognized, but no adapter exists yet.
    Buildah,
    /// Empty or unknown name.
    Unsupported(String),
}

impl Runtime {
    /// Exact, case-sensitive match.
    pub fn from_name(name: &str) -> Self {
        match name {
            "docker" => Runtime::Docker,
            "podman" => Runtime::Podman,
            "buildah" => Runtime::Buildah,
            other => Runtime::Unsupported(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
            Runtime::Buildah => "buildah",
            Runtime::Unsupported(name) => name,
        }
    }

    fn executable(&self) -> Result<&'static str, VibError> {
        match self {
            Runtime::Docker => Ok("docker"),
            Runtime::Podman => Ok("podman"),
            Runtime::Buildah => Err(VibError::BackendNotImplemented("buildah".to_string())),
            Runtime::Unsupported(name) => Err(VibError::UnsupportedRuntime(name.clone())),
        }
    }

    /// Resolve the engine and materialize the build command for `recipe`.
    ///
    /// Spawns nothing and leaves process identity alone, so selection errors
    /// surface before the privileged section starts.
    pub fn prepare(
        &self,
        recipe: &Recipe,
        runner: &dyn CommandRunner,
    ) -> Result<Invocation, VibError> {
        let executable = self.executable()?;
        let program = runner
            .locate(executable)
            .map_err(|source| VibError::BackendNotFound {
                runtime: executable.to_string(),
                source,
            })?;
        debug!(runtime = executable, program = %program.display(), "Located build engine");

        Ok(build_invocation(program, recipe))
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The build command shared by all engines.
pub fn build_invocation(program: impl Into<PathBuf>, recipe: &Recipe) -> Invocation {
    Invocation::new(program)
        .arg("build")
        .arg("-t")
        .arg(recipe.image_tag())
        .arg("-f")
        .arg(recipe.containerfile.to_string_lossy())
        .arg(".")
        .current_dir(&recipe.parent_path)
}

/// Run a prepared build and wait for it.
pub fn build(
    runtime: &Runtime,
    invocation: &Invocation,
    runner: &dyn CommandRunner,
) -> Result<(), VibError> {
    Output::running(invocation.display());
    info!(runtime = %runtime, command = %invocation.display(), "Starting image build");

    let status = runner
        .run_status(invocation)
        .map_err(|source| VibError::BuildSpawn {
            runtime: runtime.name().to_string(),
            source,
        })?;

    if !status.success() {
        return Err(VibError::BuildFailed {
            runtime: runtime.name().to_string(),
            status,
        });
    }
    Ok(())
}
