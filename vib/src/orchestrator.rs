//! Recipe compilation: load, build with root identity, finalize.
//!
//! ```text
//! load recipe -> select engine -> [enter root -> build -> restore] -> finalize chain
//! ```
//!
//! Engine selection (including the search path lookup) happens before the
//! privileged section, so an unusable runtime never changes identity. The
//! original identity is restored whether or not the build succeeds, and
//! finalize modules run with it.

use crate::backend::{self, Runtime};
use crate::command_runner::{CommandRunner, Invocation};
use crate::error::VibError;
use crate::finalize::{Dispatcher, FinalizeContext, PluginRegistry};
use crate::output::Output;
use crate::privilege::{self, IdentitySwitch, PrivilegeContext, SystemIdentity};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use vib_common::{RecipeSource, YamlRecipeSource};

/// Summary of a successful compile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    pub recipe_id: String,
    pub runtime: String,
    pub finalize_count: usize,
}

pub struct Orchestrator {
    source: Box<dyn RecipeSource>,
    runner: Arc<dyn CommandRunner>,
    identity: Arc<dyn IdentitySwitch>,
    registry: PluginRegistry,
}

impl Orchestrator {
    pub fn new(
        source: Box<dyn RecipeSource>,
        runner: Arc<dyn CommandRunner>,
        identity: Arc<dyn IdentitySwitch>,
        registry: PluginRegistry,
    ) -> Self {
        Self {
            source,
            runner,
            identity,
            registry,
        }
    }

    /// YAML recipes, real processes, real process identity.
    pub fn system(runner: Arc<dyn CommandRunner>, registry: PluginRegistry) -> Self {
        Self::new(
            Box::new(YamlRecipeSource),
            runner,
            Arc::new(SystemIdentity),
            registry,
        )
    }

    /// Build the recipe at `recipe_path` with the engine named
    /// `runtime_name`, then apply its finalize modules.
    ///
    /// Not reentrant: the build step changes the effective identity of the
    /// whole process.
    pub fn compile(
        &self,
        recipe_path: &Path,
        runtime_name: &str,
        privileges: &PrivilegeContext,
    ) -> Result<CompileReport, VibError> {
        Output::info(format!("Loading recipe {}", recipe_path.display()));
        let recipe = self.source.load(recipe_path)?;
        info!(
            recipe = %recipe.id,
            name = recipe.display_name(),
            path = %recipe.path.display(),
            finalize = recipe.finalize.len(),
            "Recipe loaded"
        );

        let runtime = Runtime::from_name(runtime_name);
        let invocation = runtime.prepare(&recipe, self.runner.as_ref())?;

        self.build_privileged(&runtime, &invocation, privileges)?;

        let ctx = FinalizeContext {
            recipe: &recipe,
            runtime: runtime.name(),
            privileges: *privileges,
        };
        let finalize_count = Dispatcher::new(&self.registry).run_chain(&ctx)?;

        Output::success(format!(
            "Image {} built successfully using {}",
            recipe.id, runtime
        ));
        Ok(CompileReport {
            recipe_id: recipe.id.clone(),
            runtime: runtime.name().to_string(),
            finalize_count,
        })
    }

    // A build failure wins over a restore failure; the latter is still logged.
    fn build_privileged(
        &self,
        runtime: &Runtime,
        invocation: &Invocation,
        privileges: &PrivilegeContext,
    ) -> Result<(), VibError> {
        let guard = privilege::enter(self.identity.as_ref(), privileges)?;
        let built = backend::build(runtime, invocation, self.runner.as_ref());
        let restored = guard.exit();

        match (built, restored) {
            (Err(build_err), Err(restore_err)) => {
                error!(
                    error = %restore_err,
                    "Failed to restore identity after failed build"
                );
                Err(build_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::MockCommandRunner;
    use crate::finalize::FinalizePlugin;
    use crate::privilege::{IdentityChange, RecordingIdentity};
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use vib_common::{Recipe, RecipeError};

    struct StubSource(Option<Recipe>);

    impl RecipeSource for StubSource {
        fn load(&self, path: &Path) -> Result<Recipe, RecipeError> {
            self.0.clone().ok_or_else(|| RecipeError::NotFound {
                path: path.to_path_buf(),
            })
        }
    }

    /// Records the raw config and the effective identity seen while applying.
    struct ProbePlugin {
        module_type: &'static str,
        identity: Arc<RecordingIdentity>,
        seen: Arc<Mutex<Vec<(Value, (u32, u32))>>>,
        fail: bool,
    }

    impl FinalizePlugin for ProbePlugin {
        fn module_type(&self) -> &str {
            self.module_type
        }

        fn apply(&self, config: &Value, _ctx: &FinalizeContext<'_>) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((config.clone(), self.identity.current()));
            if self.fail {
                anyhow::bail!("probe failure");
            }
            Ok(())
        }
    }

    struct Harness {
        runner: Arc<MockCommandRunner>,
        identity: Arc<RecordingIdentity>,
        seen: Arc<Mutex<Vec<(Value, (u32, u32))>>>,
        orchestrator: Orchestrator,
    }

    fn myos(finalize: Vec<Value>) -> Recipe {
        Recipe::new("myos", "/recipes/myos").with_finalize(finalize)
    }

    fn harness(
        recipe: Option<Recipe>,
        runner: MockCommandRunner,
        identity: RecordingIdentity,
        failing_type: Option<&'static str>,
    ) -> Harness {
        let runner = Arc::new(runner);
        let identity = Arc::new(identity);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut registry = PluginRegistry::new();
        for module_type in ["labels", "squash", "cleanup"] {
            registry.register(Box::new(ProbePlugin {
                module_type,
                identity: Arc::clone(&identity),
                seen: Arc::clone(&seen),
                fail: failing_type == Some(module_type),
            }));
        }

        let orchestrator = Orchestrator::new(
            Box::new(StubSource(recipe)),
            runner.clone(),
            identity.clone(),
            registry,
        );
        Harness {
            runner,
            identity,
            seen,
            orchestrator,
        }
    }

    fn user() -> PrivilegeContext {
        PrivilegeContext::new(false, 1000, 1000)
    }

    fn compile(h: &Harness, runtime: &str) -> Result<CompileReport, VibError> {
        h.orchestrator
            .compile(Path::new("/recipes/myos/recipe.yml"), runtime, &user())
    }

    #[test]
    fn test_docker_build_success() {
        let h = harness(
            Some(myos(vec![])),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let report = compile(&h, "docker").unwrap();
        assert_eq!(
            report,
            CompileReport {
                recipe_id: "myos".to_string(),
                runtime: "docker".to_string(),
                finalize_count: 0,
            }
        );

        let calls = h.runner.calls();
        assert_eq!(calls.len(), 1);
        let inv = &calls[0].invocation;
        assert_eq!(inv.program, PathBuf::from("/usr/bin/docker"));
        assert_eq!(
            inv.args,
            vec!["build", "-t", "localhost/myos", "-f", "Containerfile", "."]
        );
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/recipes/myos")));

        assert_eq!(h.identity.current(), (1000, 1000));
        assert_eq!(
            h.identity.changes(),
            vec![
                IdentityChange::Uid(0),
                IdentityChange::Gid(0),
                IdentityChange::Gid(1000),
                IdentityChange::Uid(1000),
            ]
        );
    }

    #[test]
    fn test_failed_build_still_restores_identity() {
        let h = harness(
            Some(myos(vec![json!({"type": "labels"})])),
            MockCommandRunner::new()
                .with_program("podman")
                .with_exit_codes([1]),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "podman").unwrap_err();
        assert!(matches!(err, VibError::BuildFailed { .. }));
        assert_eq!(h.identity.current(), (1000, 1000));
        assert!(h.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_build_spawn_failure_restores_identity() {
        let h = harness(
            Some(myos(vec![])),
            MockCommandRunner::new()
                .with_program("docker")
                .failing_spawn(),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(err, VibError::BuildSpawn { .. }));
        assert_eq!(h.identity.current(), (1000, 1000));
    }

    #[test]
    fn test_buildah_touches_nothing() {
        let h = harness(
            Some(myos(vec![])),
            MockCommandRunner::new().with_program("buildah"),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "buildah").unwrap_err();
        assert!(matches!(err, VibError::BackendNotImplemented(_)));
        assert!(h.runner.calls().is_empty());
        assert!(h.identity.changes().is_empty());
    }

    #[test]
    fn test_unsupported_runtime_before_privilege_change() {
        for name in ["", "kaniko"] {
            let h = harness(
                Some(myos(vec![])),
                MockCommandRunner::new(),
                RecordingIdentity::new(1000, 1000),
                None,
            );

            let err = compile(&h, name).unwrap_err();
            assert!(matches!(err, VibError::UnsupportedRuntime(ref n) if n == name));
            assert!(h.identity.changes().is_empty());
        }
    }

    #[test]
    fn test_missing_engine_before_privilege_change() {
        let h = harness(
            Some(myos(vec![])),
            MockCommandRunner::new(),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(err, VibError::BackendNotFound { .. }));
        assert!(h.identity.changes().is_empty());
    }

    #[test]
    fn test_load_error_is_returned_unchanged() {
        let h = harness(
            None,
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        match err {
            VibError::Load(RecipeError::NotFound { path }) => {
                assert_eq!(path, PathBuf::from("/recipes/myos/recipe.yml"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.runner.calls().is_empty());
        assert!(h.identity.changes().is_empty());
    }

    #[test]
    fn test_privilege_failure_skips_build() {
        let h = harness(
            Some(myos(vec![])),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000).deny_uid(0),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(err, VibError::Privilege { .. }));
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.identity.current(), (1000, 1000));
    }

    #[test]
    fn test_restore_failure_skips_finalize() {
        let h = harness(
            Some(myos(vec![json!({"type": "labels"})])),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000).deny_gid(1000),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(err, VibError::Privilege { .. }));
        assert!(h.seen.lock().unwrap().is_empty());
        assert_eq!(h.identity.current().0, 1000);
    }

    #[test]
    fn test_finalize_runs_in_order_with_original_identity() {
        let entries = vec![
            json!({"type": "squash", "level": 2}),
            json!({"type": "labels", "extra": {"a": "b"}}),
        ];
        let h = harness(
            Some(myos(entries.clone())),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let report = compile(&h, "docker").unwrap();
        assert_eq!(report.finalize_count, 2);

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, entries[0]);
        assert_eq!(seen[1].0, entries[1]);
        assert!(seen.iter().all(|(_, ids)| *ids == (1000, 1000)));
    }

    #[test]
    fn test_finalize_failure_aborts_chain() {
        let h = harness(
            Some(myos(vec![
                json!({"type": "labels"}),
                json!({"type": "squash"}),
                json!({"type": "cleanup"}),
            ])),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000),
            Some("squash"),
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(
            err,
            VibError::FinalizeFailed { index: 1, ref module_type, .. } if module_type == "squash"
        ));

        let seen: Vec<Value> = h
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        assert_eq!(
            seen,
            vec![json!({"type": "labels"}), json!({"type": "squash"})]
        );
    }

    #[test]
    fn test_undecodable_finalize_entry() {
        let h = harness(
            Some(myos(vec![
                json!({"type": "labels"}),
                json!(["not", "a", "map"]),
            ])),
            MockCommandRunner::new().with_program("docker"),
            RecordingIdentity::new(1000, 1000),
            None,
        );

        let err = compile(&h, "docker").unwrap_err();
        assert!(matches!(err, VibError::FinalizeDecode { index: 1, .. }));
        assert_eq!(h.seen.lock().unwrap().len(), 1);
    }
}
