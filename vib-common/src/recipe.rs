//! Recipe model and loader.
//!
//! A recipe describes one buildable image: the tag-safe `id`, the
//! Containerfile to hand to the build engine, and the ordered list of
//! finalize modules applied after the build. Finalize entries stay
//! loosely typed here; each plugin decodes its own options.

use crate::error::RecipeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File names tried, in order, when a recipe path points at a directory.
pub const RECIPE_FILE_NAMES: &[&str] = &["recipe.yml", "recipe.yaml"];

/// Containerfile name used when the recipe does not set one.
pub const DEFAULT_CONTAINERFILE: &str = "Containerfile";

const MAX_ID_LEN: usize = 128;

fn default_containerfile() -> PathBuf {
    PathBuf::from(DEFAULT_CONTAINERFILE)
}

/// One buildable unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Recipe {
    /// Image id, used as the `localhost/<id>` tag and as a log label
    pub id: String,

    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Base image reference, informational for the build engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,

    /// Build instruction file, relative to the recipe directory
    #[serde(default = "default_containerfile")]
    pub containerfile: PathBuf,

    /// Finalize module configurations, applied in order after the build
    #[serde(default)]
    pub finalize: Vec<serde_json::Value>,

    /// Absolute path of the recipe file (set by the loader)
    #[serde(default, skip_deserializing)]
    pub path: PathBuf,

    /// Directory the build runs from (set by the loader)
    #[serde(default, skip_deserializing)]
    pub parent_path: PathBuf,
}

impl Recipe {
    /// Create a recipe rooted at `parent_path` with the default Containerfile
    /// and no finalize modules.
    pub fn new(id: impl Into<String>, parent_path: impl Into<PathBuf>) -> Self {
        let parent_path = parent_path.into();
        Self {
            id: id.into(),
            name: None,
            base: None,
            labels: BTreeMap::new(),
            args: BTreeMap::new(),
            containerfile: default_containerfile(),
            finalize: Vec::new(),
            path: parent_path.join(RECIPE_FILE_NAMES[0]),
            parent_path,
        }
    }

    pub fn with_finalize(mut self, finalize: Vec<serde_json::Value>) -> Self {
        self.finalize = finalize;
        self
    }

    pub fn with_containerfile(mut self, containerfile: impl Into<PathBuf>) -> Self {
        self.containerfile = containerfile.into();
        self
    }

    /// The tag the built image is published under.
    pub fn image_tag(&self) -> String {
        format!("localhost/{}", self.id)
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Check the invariants the build step relies on.
    pub fn validate(&self) -> Result<(), RecipeError> {
        validate_id(&self.id)?;

        if self.containerfile.is_absolute() {
            return Err(RecipeError::AbsoluteContainerfile {
                path: self.containerfile.clone(),
            });
        }

        let containerfile = self.parent_path.join(&self.containerfile);
        if !containerfile.is_file() {
            return Err(RecipeError::ContainerfileMissing {
                path: containerfile,
            });
        }

        Ok(())
    }
}

/// Check that an id is usable both as a file name and as an image tag
/// component.
pub fn validate_id(id: &str) -> Result<(), RecipeError> {
    let invalid = |reason: &str| RecipeError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = id.chars().next() else {
        return Err(invalid("id must not be empty"));
    };
    if id.len() > MAX_ID_LEN {
        return Err(invalid(&format!("id must be at most {MAX_ID_LEN} characters")));
    }
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(invalid("id must start with a lowercase letter or digit"));
    }
    let allowed =
        |c: &char| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-');
    if let Some(bad) = id.chars().find(|c| !allowed(c)) {
        return Err(invalid(&format!("character '{bad}' is not allowed")));
    }

    Ok(())
}

/// Resolves a path into a validated [`Recipe`].
pub trait RecipeSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Recipe, RecipeError>;
}

/// Loads recipes from YAML files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlRecipeSource;

impl YamlRecipeSource {
    fn resolve(path: &Path) -> Result<PathBuf, RecipeError> {
        if path.is_dir() {
            return RECIPE_FILE_NAMES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| RecipeError::NotFound {
                    path: path.join(RECIPE_FILE_NAMES[0]),
                });
        }
        if !path.exists() {
            return Err(RecipeError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(path.to_path_buf())
    }
}

impl RecipeSource for YamlRecipeSource {
    fn load(&self, path: &Path) -> Result<Recipe, RecipeError> {
        let file = Self::resolve(path)?;
        let file = fs::canonicalize(&file).map_err(|source| RecipeError::Read {
            path: file.clone(),
            source,
        })?;

        let content = fs::read_to_string(&file).map_err(|source| RecipeError::Read {
            path: file.clone(),
            source,
        })?;
        let mut recipe: Recipe =
            serde_yaml::from_str(&content).map_err(|source| RecipeError::Parse {
                path: file.clone(),
                source,
            })?;

        recipe.parent_path = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        recipe.path = file;

        recipe.validate()?;
        Ok(recipe)
    }
}
