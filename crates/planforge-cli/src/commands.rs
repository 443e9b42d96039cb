use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use planforge_backend_ort::TensorRtCompiler;
use planforge_backend_ref::{ReferenceCompiler, ReferenceRuntime, BACKEND_NAME};
use planforge_builder::{BuildOutput, EngineBuilder};
use planforge_core::{
    BuildOptions, CompiledPlan, ComputationGraph, Device, ModelArtifact, PlanCompiler,
    PlanRuntime, PlanSession, SystemOptions, Tensor,
};
use tracing::{info, warn};

use crate::cli::{BackendKind, BuildArgs, RunArgs};
use crate::graph::load_graph;
use crate::options;

pub fn build(args: &BuildArgs) -> Result<BuildOutput> {
    let (build, system) = options::resolve(args)?;
    let artifact = ModelArtifact::from_path(&args.model);
    let graph = load_graph(&artifact)?;

    let output = match args.backend {
        BackendKind::Reference => build_with(
            ReferenceCompiler::with_accelerator_cores(args.dla_cores),
            &graph,
            &build,
            &system,
        )?,
        BackendKind::Tensorrt => {
            let ModelArtifact::OnnxPath(model) = &artifact else {
                bail!("the tensorrt backend compiles from an .onnx model");
            };
            let cache = args
                .engine_cache
                .clone()
                .unwrap_or_else(|| default_engine_cache(&args.output));
            build_with(
                TensorRtCompiler::new(model, cache).with_dla_cores(args.dla_cores),
                &graph,
                &build,
                &system,
            )?
        }
    };

    std::fs::write(&args.output, output.plan.data())
        .with_context(|| format!("failed to write plan {}", args.output.display()))?;
    info!(
        plan = %args.output.display(),
        backend = output.plan.backend(),
        bytes = output.plan.len(),
        "plan written"
    );
    Ok(output)
}

fn build_with<C: PlanCompiler>(
    compiler: C,
    graph: &ComputationGraph,
    build: &BuildOptions,
    system: &SystemOptions,
) -> Result<BuildOutput> {
    let output = EngineBuilder::new(compiler)
        .build(graph, build, system)
        .context("plan build failed")?;
    Ok(output)
}

fn default_engine_cache(output: &Path) -> PathBuf {
    output
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("engine-cache")
}

/// Replays a reference plan once and returns the output tensors.
pub fn run(args: &RunArgs) -> Result<Vec<Tensor>> {
    let device: Device = args.device.parse()?;
    let data = std::fs::read(&args.plan)
        .with_context(|| format!("failed to read plan {}", args.plan.display()))?;
    let plan = CompiledPlan::new(BACKEND_NAME, data);

    let mut session = ReferenceRuntime::new().load(&plan, device)?;
    let inputs = zero_inputs(session.graph(), args.batch)?;
    let outputs = session.infer(inputs)?;
    for (spec, tensor) in session.graph().outputs.iter().zip(&outputs) {
        info!(
            output = %spec.name,
            dtype = %tensor.desc.dtype,
            shape = %tensor.desc.shape,
            "replayed"
        );
    }
    Ok(outputs)
}

fn zero_inputs(graph: &ComputationGraph, batch: usize) -> Result<Vec<Tensor>> {
    graph
        .inputs
        .iter()
        .map(|input| {
            let shape = input.shape_with_batch(batch).with_context(|| {
                format!(
                    "input `{}` {} has dynamic non-batch dimensions",
                    input.name,
                    input.dims_display()
                )
            })?;
            Ok(Tensor::zeros(input.dtype, shape))
        })
        .collect()
}

/// Renders the I/O table of a model.
pub fn inspect(model: &Path) -> Result<String> {
    let graph = load_graph(&ModelArtifact::from_path(model))?;
    if graph.inputs.is_empty() {
        warn!(model = %model.display(), "model declares no inputs");
    }

    let mut out = format!("graph: {}\n", graph.name);
    for (kind, specs) in [("input", &graph.inputs), ("output", &graph.outputs)] {
        for spec in specs {
            out.push_str(&format!(
                "{kind:<7} {:<24} {:<5} {}\n",
                spec.name.as_str(),
                spec.dtype.to_string(),
                spec.dims_display()
            ));
        }
    }
    Ok(out)
}
