use planforge_core::{BuildOptions, BuilderConfig, ComputationGraph, SystemOptions};

/// Read-only inputs shared by every stage of one build.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    pub build: &'a BuildOptions,
    pub system: &'a SystemOptions,
    /// Accelerator cores reported by the compiler backend.
    pub accelerator_cores: u32,
}

/// Configuration in progress.
///
/// Owns a working copy of the caller's graph. Stages mutate it freely; it
/// only reaches the caller if every stage and the compiler succeed.
#[derive(Clone, Debug)]
pub struct BuildState {
    pub graph: ComputationGraph,
    pub config: BuilderConfig,
}

impl BuildState {
    pub fn new(graph: &ComputationGraph) -> Self {
        Self {
            graph: graph.clone(),
            config: BuilderConfig::default(),
        }
    }
}
