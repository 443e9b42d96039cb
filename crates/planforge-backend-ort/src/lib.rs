use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    tensor::TensorElementType,
    value::ValueType,
};
use planforge_core::{
    BuilderConfig, CompiledPlan, ComputationGraph, DType, GraphSource, IOName, ModelArtifact,
    OptProfileSelector, PlanCompiler, TensorLayouts, TensorSpec,
};
use tracing::debug;

#[cfg(feature = "tensorrt")]
mod tensorrt;

/// Reads graph I/O declarations from ONNX files through ONNX Runtime.
pub struct OrtGraphSource;

impl OrtGraphSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtGraphSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphSource for OrtGraphSource {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn load_graph(&self, artifact: &ModelArtifact) -> Result<ComputationGraph> {
        let ModelArtifact::OnnxPath(path) = artifact else {
            bail!("onnxruntime graph source expects an ONNX file path");
        };

        let session = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Disable)
            .context("failed to configure ORT session builder")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        let graph = graph_from_session(&session, path)?;
        debug!(
            model = %path.display(),
            inputs = graph.inputs.len(),
            outputs = graph.outputs.len(),
            "imported ONNX graph"
        );
        Ok(graph)
    }
}

fn graph_from_session(session: &Session, path: &Path) -> Result<ComputationGraph> {
    let inputs = session
        .inputs
        .iter()
        .map(|input| tensor_spec_from_value_type(&input.name, &input.input_type))
        .collect::<Result<Vec<_>>>()?;

    let outputs = session
        .outputs
        .iter()
        .map(|output| tensor_spec_from_value_type(&output.name, &output.output_type))
        .collect::<Result<Vec<_>>>()?;

    Ok(ComputationGraph {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        inputs,
        outputs,
    })
}

fn tensor_spec_from_value_type(name: &str, value_type: &ValueType) -> Result<TensorSpec> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("unsupported non-tensor IO value type for `{name}`");
    };

    let dtype = ort_tensor_element_to_dtype(*ty)?;
    Ok(TensorSpec {
        name: IOName(name.to_string()),
        dtype,
        layouts: TensorLayouts::LINEAR,
        dims: onnx_dims(shape.iter().copied()),
        dynamic_range: None,
    })
}

/// ONNX marks unknown extents with negative values.
fn onnx_dims(dims: impl Iterator<Item = i64>) -> Vec<Option<usize>> {
    dims.map(|d| usize::try_from(d).ok()).collect()
}

fn ort_tensor_element_to_dtype(ty: TensorElementType) -> Result<DType> {
    match ty {
        TensorElementType::Float32 => Ok(DType::F32),
        TensorElementType::Float16 => Ok(DType::F16),
        TensorElementType::Int64 => Ok(DType::I64),
        TensorElementType::Int32 => Ok(DType::I32),
        TensorElementType::Int8 => Ok(DType::I8),
        TensorElementType::Uint8 => Ok(DType::U8),
        TensorElementType::Bool => Ok(DType::Bool),
        _ => bail!("unsupported tensor element type: {ty}"),
    }
}

/// Renders one side of a profile as `name:1x3x224x224,...`, the shape list
/// syntax ONNX Runtime's TensorRT provider expects.
pub fn profile_shapes(
    config: &BuilderConfig,
    graph: &ComputationGraph,
    which: OptProfileSelector,
) -> String {
    if let Some(profile) = &config.profile {
        return profile
            .iter()
            .map(|(name, bounds)| format!("{name}:{}", bounds.get(which)))
            .collect::<Vec<_>>()
            .join(",");
    }

    // Fixed batch: dynamic-batch inputs span [1, max_batch].
    let Some(max_batch) = config.max_batch_size else {
        return String::new();
    };
    let batch = match which {
        OptProfileSelector::Min => 1,
        OptProfileSelector::Opt | OptProfileSelector::Max => max_batch as usize,
    };
    graph
        .inputs
        .iter()
        .filter(|input| input.dims.first().is_some_and(Option::is_none))
        .filter_map(|input| {
            input
                .shape_with_batch(batch)
                .map(|shape| format!("{}:{shape}", input.name))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds TensorRT engines through ONNX Runtime's TensorRT execution provider.
///
/// ONNX Runtime compiles from the model file, so the compiler is bound to
/// the same ONNX path the graph was imported from. The engine cache the
/// provider writes into `cache_dir` is returned as the plan.
pub struct TensorRtCompiler {
    model_path: PathBuf,
    cache_dir: PathBuf,
    dla_cores: u32,
}

impl TensorRtCompiler {
    pub fn new(model_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            cache_dir: cache_dir.into(),
            dla_cores: 0,
        }
    }

    /// Number of DLA cores on the target. ONNX Runtime cannot query it.
    pub fn with_dla_cores(mut self, cores: u32) -> Self {
        self.dla_cores = cores;
        self
    }
}

impl PlanCompiler for TensorRtCompiler {
    fn name(&self) -> &'static str {
        "tensorrt"
    }

    fn accelerator_cores(&self) -> u32 {
        self.dla_cores
    }

    fn compile(&self, graph: &ComputationGraph, config: &BuilderConfig) -> Result<CompiledPlan> {
        #[cfg(feature = "tensorrt")]
        {
            tensorrt::compile(&self.model_path, &self.cache_dir, graph, config)
        }
        #[cfg(not(feature = "tensorrt"))]
        {
            let _ = (graph, config, &self.model_path, &self.cache_dir);
            bail!("TensorRT requested but planforge-backend-ort was built without the `tensorrt` feature")
        }
    }
}
