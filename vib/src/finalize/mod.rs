//! Finalize modules: post-build transformations declared by the recipe.
//!
//! Each entry of `Recipe::finalize` is decoded twice. The dispatcher decodes
//! just enough to read the `type` discriminator ([`FinalizeModule`]); the
//! plugin registered for that type then receives the untouched raw entry and
//! decodes its own options.

pub mod exec;

use crate::error::VibError;
use crate::output::Output;
use crate::privilege::PrivilegeContext;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use vib_common::Recipe;

/// The discriminator every finalize entry must carry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FinalizeModule {
    #[serde(rename = "type")]
    pub module_type: String,
}

impl FinalizeModule {
    /// Read `type` from a raw entry. Other keys are ignored.
    pub fn decode(raw: &Value) -> Result<Self, serde_json::Error> {
        FinalizeModule::deserialize(raw)
    }
}

/// Everything a plugin may need besides its own configuration.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeContext<'a> {
    pub recipe: &'a Recipe,
    /// Name of the build engine that produced the image.
    pub runtime: &'a str,
    /// Identity from before the build. A plugin that needs root opens its
    /// own privilege bracket with these values.
    pub privileges: PrivilegeContext,
}

/// A post-build transformation.
pub trait FinalizePlugin: Send + Sync {
    /// The `type` value this plugin handles.
    fn module_type(&self) -> &str;

    /// Apply the transformation. `config` is the recipe entry exactly as
    /// loaded, including its `type` key.
    fn apply(&self, config: &Value, ctx: &FinalizeContext<'_>) -> anyhow::Result<()>;
}

/// Registered plugins, keyed by module type.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn FinalizePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A later registration for the same type wins.
    pub fn register(&mut self, plugin: Box<dyn FinalizePlugin>) {
        let module_type = plugin.module_type().to_string();
        if self.plugins.insert(module_type.clone(), plugin).is_some() {
            warn!(
                module_type = %module_type,
                "Replacing previously registered finalize plugin"
            );
        }
    }

    pub fn get(&self, module_type: &str) -> Option<&dyn FinalizePlugin> {
        self.plugins.get(module_type).map(|p| p.as_ref())
    }

    /// Registered types in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Routes finalize entries to their plugins.
pub struct Dispatcher<'r> {
    registry: &'r PluginRegistry,
}

impl<'r> Dispatcher<'r> {
    pub fn new(registry: &'r PluginRegistry) -> Self {
        Self { registry }
    }

    /// Hand `raw`, the entry at position `index` of the chain, to the plugin
    /// registered for `module_type`.
    pub fn dispatch(
        &self,
        index: usize,
        module_type: &str,
        raw: &Value,
        ctx: &FinalizeContext<'_>,
    ) -> Result<(), VibError> {
        let plugin = self
            .registry
            .get(module_type)
            .ok_or_else(|| VibError::UnknownFinalizeType {
                index,
                module_type: module_type.to_string(),
            })?;

        debug!(index, module_type, recipe = %ctx.recipe.id, "Dispatching finalize module");
        plugin
            .apply(raw, ctx)
            .map_err(|source| VibError::FinalizeFailed {
                index,
                module_type: module_type.to_string(),
                source,
            })
    }

    /// Run every finalize entry of the recipe in declared order, stopping at
    /// the first failure. Returns the number of modules applied.
    pub fn run_chain(&self, ctx: &FinalizeContext<'_>) -> Result<usize, VibError> {
        for (index, raw) in ctx.recipe.finalize.iter().enumerate() {
            let module = FinalizeModule::decode(raw)
                .map_err(|source| VibError::FinalizeDecode { index, source })?;

            Output::step(format!("Finalize: {}", module.module_type));
            self.dispatch(index, &module.module_type, raw, ctx)?;
            info!(index, module_type = %module.module_type, "Finalize module applied");
        }
        Ok(ctx.recipe.finalize.len())
    }
}
