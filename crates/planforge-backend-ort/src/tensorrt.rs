use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use ort::execution_providers::tensorrt::TensorRTExecutionProvider;
use ort::session::Session;
use planforge_core::{
    BuilderConfig, BuilderFlags, CompiledPlan, ComputationGraph, DeviceType, EngineCapability,
    OptProfileSelector, Quantization, TensorFormat,
};
use tracing::{debug, info, warn};

use crate::profile_shapes;

pub(crate) fn compile(
    model_path: &Path,
    cache_dir: &Path,
    graph: &ComputationGraph,
    config: &BuilderConfig,
) -> Result<CompiledPlan> {
    ensure!(
        config.engine_capability == EngineCapability::Standard,
        "the TensorRT execution provider cannot build safety-certified engines"
    );
    if graph.bindings().any(|t| t.format() != TensorFormat::default()) {
        warn!("TensorRT execution provider ignores binding format overrides");
    }

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create engine cache {}", cache_dir.display()))?;

    let mut ep = TensorRTExecutionProvider::default()
        .with_device_id(config.gpu_device as i32)
        .with_max_workspace_size(config.max_workspace_size as usize)
        .with_fp16(config.has_flag(BuilderFlags::FP16))
        .with_int8(config.has_flag(BuilderFlags::INT8))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_dir.display().to_string());

    match &config.quantization {
        Quantization::None => {}
        Quantization::Calibrated(calibrator) => {
            ep = ep.with_int8_calibration_table_name(calibrator.data.display().to_string());
        }
        Quantization::ExplicitRanges { .. } => {
            bail!("explicit dynamic ranges are not supported; supply a calibration table")
        }
    }

    if config.default_device == DeviceType::Dla {
        let core = config.dla_core.context("DLA target without a core index")?;
        ep = ep.with_dla(true).with_dla_core(core);
        if !config.has_flag(BuilderFlags::GPU_FALLBACK) {
            warn!("TensorRT execution provider always allows GPU fallback");
        }
    }

    let min = profile_shapes(config, graph, OptProfileSelector::Min);
    if !min.is_empty() {
        let opt = profile_shapes(config, graph, OptProfileSelector::Opt);
        let max = profile_shapes(config, graph, OptProfileSelector::Max);
        debug!(%min, %opt, %max, "tensorrt profile shapes");
        ep = ep
            .with_profile_min_shapes(min)
            .with_profile_opt_shapes(opt)
            .with_profile_max_shapes(max);
    }

    let before = engine_files(cache_dir)?;
    Session::builder()
        .context("failed to create ORT session builder")?
        .with_execution_providers([ep.build().error_on_failure()])
        .context("failed to enable the TensorRT execution provider")?
        .commit_from_file(model_path)
        .context("TensorRT engine build failed")?;

    let engine = newest_engine(cache_dir, &before)?;
    let data = std::fs::read(&engine)
        .with_context(|| format!("failed to read engine {}", engine.display()))?;
    info!(engine = %engine.display(), bytes = data.len(), "tensorrt engine cached");
    Ok(CompiledPlan::new("tensorrt", data))
}

fn engine_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list engine cache {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "engine") {
            files.push(path);
        }
    }
    Ok(files)
}

/// The engine written by this build, or the most recent one if the provider
/// reused a cached engine.
fn newest_engine(dir: &Path, before: &[PathBuf]) -> Result<PathBuf> {
    let after = engine_files(dir)?;
    if let Some(fresh) = after.iter().find(|p| !before.contains(p)) {
        return Ok(fresh.clone());
    }
    after
        .into_iter()
        .filter_map(|p| {
            let modified = p.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, p)| p)
        .context("TensorRT execution provider did not write an engine")
}
