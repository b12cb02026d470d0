//! Error types for image compilation.
//!
//! Every failure of a compile run maps to exactly one variant, so callers
//! can tell a recipe problem from a privilege problem from a plugin failure.

use std::process::ExitStatus;
use thiserror::Error;
use vib_common::RecipeError;

#[derive(Error, Debug)]
pub enum VibError {
    #[error(transparent)]
    Load(#[from] RecipeError),

    #[error("failed to {action}: {source}")]
    Privilege {
        action: String,
        #[source]
        source: nix::Error,
    },

    #[error("{runtime} not found in PATH: {source}")]
    BackendNotFound {
        runtime: String,
        #[source]
        source: which::Error,
    },

    #[error("{0} not implemented yet")]
    BackendNotImplemented(String),

    #[error("{}", unsupported_runtime_message(.0))]
    UnsupportedRuntime(String),

    #[error("failed to start {runtime} build: {source}")]
    BuildSpawn {
        runtime: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{runtime} build failed: {status}")]
    BuildFailed { runtime: String, status: ExitStatus },

    #[error("failed to decode finalize module #{index}: {source}")]
    FinalizeDecode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown finalize module type '{module_type}' (module #{index})")]
    UnknownFinalizeType { index: usize, module_type: String },

    #[error("finalize module #{index} ('{module_type}') failed: {source}")]
    FinalizeFailed {
        index: usize,
        module_type: String,
        #[source]
        source: anyhow::Error,
    },
}

fn unsupported_runtime_message(name: &str) -> String {
    if name.is_empty() {
        "no runtime specified (expected docker or podman)".to_string()
    } else {
        format!("unsupported runtime '{name}' (expected docker or podman)")
    }
}

impl VibError {
    pub(crate) fn privilege(action: impl Into<String>, source: nix::Error) -> Self {
        Self::Privilege {
            action: action.into(),
            source,
        }
    }
}
