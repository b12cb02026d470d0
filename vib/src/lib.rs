//! vib - build OCI images from recipes
//!
//! A recipe names an image and the Containerfile that builds it. `vib`
//! hands the build to a container engine chosen at invocation time, running
//! it with root effective identity, then applies the recipe's finalize
//! modules in order with the caller's own identity.
//!
//! # Pipeline
//!
//! 1. Load the recipe ([`vib_common::RecipeSource`])
//! 2. Select the engine ([`backend::Runtime`])
//! 3. Build inside a privilege bracket ([`privilege::enter`])
//! 4. Dispatch finalize modules ([`finalize::Dispatcher`])

pub mod backend;
pub mod cli;
pub mod command_runner;
pub mod commands;
pub mod error;
pub mod finalize;
pub mod orchestrator;
pub mod output;
pub mod privilege;

pub use cli::{Cli, Commands};
pub use error::VibError;
pub use orchestrator::{CompileReport, Orchestrator};
