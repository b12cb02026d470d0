use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read recipe {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse recipe {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid recipe id '{id}': {reason}")]
    InvalidId { id: String, reason: String },
    #[error("containerfile not found: {}", path.display())]
    ContainerfileMissing { path: PathBuf },
    #[error("containerfile must be relative to the recipe directory: {}", path.display())]
    AbsoluteContainerfile { path: PathBuf },
}
