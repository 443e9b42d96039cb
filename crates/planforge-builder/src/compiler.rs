use planforge_core::{
    BuildError, BuildOptions, BuildResult, BuilderConfig, CompiledPlan, ComputationGraph, IoSide,
    PlanCompiler, SystemOptions,
};
use tracing::{debug, error, info};

use crate::{default_stages, BuildContext, BuildStage, BuildState};

/// A successful build: the plan plus the resolved graph and configuration
/// it was compiled from.
#[derive(Clone, Debug)]
pub struct BuildOutput {
    pub plan: CompiledPlan,
    pub graph: ComputationGraph,
    pub config: BuilderConfig,
}

/// Final step: applies the workspace budget and invokes the compiler.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineCompiler;

impl EngineCompiler {
    pub fn compile(
        &self,
        compiler: &dyn PlanCompiler,
        build: &BuildOptions,
        mut state: BuildState,
    ) -> BuildResult<BuildOutput> {
        state.config.max_workspace_size = build.workspace_mib.saturating_mul(1 << 20);
        debug!(
            workspace_bytes = state.config.max_workspace_size,
            backend = compiler.name(),
            "invoking compiler"
        );

        match compiler.compile(&state.graph, &state.config) {
            Ok(plan) => Ok(BuildOutput {
                plan,
                graph: state.graph,
                config: state.config,
            }),
            Err(err) => {
                let reason = format!("{err:#}");
                error!(backend = compiler.name(), %reason, "compilation failed");
                Err(BuildError::CompilationFailure {
                    backend: compiler.name().to_string(),
                    reason,
                })
            }
        }
    }
}

/// Runs the build stages and the compiler over a working copy of a graph.
pub struct EngineBuilder<C> {
    compiler: C,
    stages: Vec<Box<dyn BuildStage>>,
}

impl<C: PlanCompiler> EngineBuilder<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            stages: default_stages(),
        }
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Resolves the configuration without compiling.
    ///
    /// The caller's graph is never modified; the returned state holds the
    /// resolved copy.
    pub fn configure(
        &self,
        graph: &ComputationGraph,
        build: &BuildOptions,
        system: &SystemOptions,
    ) -> BuildResult<BuildState> {
        check_options(graph, build)?;

        let ctx = BuildContext {
            build,
            system,
            accelerator_cores: self.compiler.accelerator_cores(),
        };
        let mut state = BuildState::new(graph);
        for stage in &self.stages {
            debug!(stage = stage.name(), "running build stage");
            stage.apply(&ctx, &mut state)?;
        }
        Ok(state)
    }

    /// Resolves the configuration and compiles a plan.
    pub fn build(
        &self,
        graph: &ComputationGraph,
        build: &BuildOptions,
        system: &SystemOptions,
    ) -> BuildResult<BuildOutput> {
        info!(
            graph = %graph.name,
            inputs = graph.inputs.len(),
            outputs = graph.outputs.len(),
            backend = self.compiler.name(),
            "building plan"
        );
        let state = self.configure(graph, build, system)?;
        let output = EngineCompiler.compile(&self.compiler, build, state)?;
        info!(bytes = output.plan.len(), "plan built");
        Ok(output)
    }
}

/// Caller errors the stages themselves do not check.
fn check_options(graph: &ComputationGraph, build: &BuildOptions) -> BuildResult<()> {
    if let Some(max_batch) = build.fixed_batch() {
        if !build.shapes.is_empty() {
            return Err(BuildError::ConflictingBatchMode {
                max_batch,
                bounds: build.shapes.len(),
            });
        }
    }

    let sides = [
        (IoSide::Input, graph.inputs.len(), build.input_formats.len()),
        (IoSide::Output, graph.outputs.len(), build.output_formats.len()),
    ];
    for (side, expected, got) in sides {
        if got != 0 && got != expected {
            return Err(BuildError::FormatCountMismatch {
                side,
                expected,
                got,
            });
        }
    }
    Ok(())
}
