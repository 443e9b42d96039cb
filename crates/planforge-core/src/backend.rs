use anyhow::Result;

use crate::{BuilderConfig, CompiledPlan, ComputationGraph, Device, ModelArtifact, Tensor};

/// Turns a model artifact into graph I/O declarations.
pub trait GraphSource {
    fn name(&self) -> &'static str;
    fn load_graph(&self, artifact: &ModelArtifact) -> Result<ComputationGraph>;
}

/// The compiler behind the build pipeline.
pub trait PlanCompiler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of fixed-function accelerator cores this compiler can target.
    fn accelerator_cores(&self) -> u32;

    /// Builds a plan for `graph` under `config`. Never returns a partial plan.
    fn compile(&self, graph: &ComputationGraph, config: &BuilderConfig) -> Result<CompiledPlan>;
}

/// Loads compiled plans for replay.
pub trait PlanRuntime: Send + Sync + 'static {
    type Session: PlanSession;

    fn name(&self) -> &'static str;
    fn load(&self, plan: &CompiledPlan, device: Device) -> Result<Self::Session>;
}

pub trait PlanSession: Send + 'static {
    /// Bindings the plan was built for.
    fn graph(&self) -> &ComputationGraph;

    /// Inputs are positional and already on the right device.
    fn infer(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>>;
}
