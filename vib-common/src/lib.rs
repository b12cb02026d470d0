pub mod error;
pub mod recipe;

pub use error::RecipeError;
pub use recipe::{Recipe, RecipeSource, YamlRecipeSource};
