//! Host-only reference compiler and runtime.
//!
//! The compiler checks a configuration the way a device compiler would and
//! serializes the resolved bindings and configuration as the plan. The
//! runtime replays such a plan by validating input bindings against the
//! plan's batch rules and returning zero-filled outputs.

use anyhow::{bail, ensure, Context, Result};
use bytes::{BufMut, BytesMut};
use planforge_core::{
    BuilderConfig, BuilderFlags, CompiledPlan, ComputationGraph, Device, DeviceType,
    EngineCapability, PlanCompiler, PlanRuntime, PlanSession, Quantization, Shape, Tensor,
    TensorSpec,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BACKEND_NAME: &str = "reference";
const PLAN_MAGIC: &[u8; 8] = b"PFPLAN01";

/// Contents of a reference plan after the magic header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanManifest {
    pub graph: ComputationGraph,
    pub config: BuilderConfig,
}

impl PlanManifest {
    pub fn encode(&self) -> Result<CompiledPlan> {
        let json = serde_json::to_vec(self).context("failed to serialize plan manifest")?;
        let mut buf = BytesMut::with_capacity(PLAN_MAGIC.len() + json.len());
        buf.put_slice(PLAN_MAGIC);
        buf.put_slice(&json);
        Ok(CompiledPlan::new(BACKEND_NAME, buf.freeze()))
    }

    pub fn decode(plan: &CompiledPlan) -> Result<Self> {
        ensure!(
            plan.backend() == BACKEND_NAME,
            "plan was built by `{}`, not the reference backend",
            plan.backend()
        );
        let data = plan.data();
        let Some(body) = data.strip_prefix(PLAN_MAGIC.as_slice()) else {
            bail!("not a reference plan: bad magic header");
        };
        serde_json::from_slice(body).context("corrupt reference plan manifest")
    }
}

pub struct ReferenceCompiler {
    accelerator_cores: u32,
}

impl ReferenceCompiler {
    pub fn new() -> Self {
        Self::with_accelerator_cores(0)
    }

    /// Pretends the machine has `cores` fixed-function accelerator cores.
    pub fn with_accelerator_cores(cores: u32) -> Self {
        Self {
            accelerator_cores: cores,
        }
    }
}

impl Default for ReferenceCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCompiler for ReferenceCompiler {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn accelerator_cores(&self) -> u32 {
        self.accelerator_cores
    }

    fn compile(&self, graph: &ComputationGraph, config: &BuilderConfig) -> Result<CompiledPlan> {
        for input in &graph.inputs {
            check_input_shape(input, config)?;
        }
        check_quantization(graph, config)?;
        check_target(config, self.accelerator_cores)?;

        let manifest = PlanManifest {
            graph: graph.clone(),
            config: config.clone(),
        };
        let plan = manifest.encode()?;
        debug!(bytes = plan.len(), "reference plan serialized");
        Ok(plan)
    }
}

fn check_input_shape(input: &TensorSpec, config: &BuilderConfig) -> Result<()> {
    let dynamic = input.dynamic_non_batch_dims();
    let covered = config
        .profile
        .as_ref()
        .is_some_and(|p| p.get(input.name.as_str()).is_some());
    ensure!(
        dynamic.is_empty() || covered,
        "input `{}` {} has dynamic dimensions {dynamic:?} and no optimization profile",
        input.name,
        input.dims_display()
    );
    let dynamic_batch = input.dims.first().is_some_and(Option::is_none);
    ensure!(
        !dynamic_batch || covered || config.max_batch_size.is_some(),
        "input `{}` has a dynamic batch dimension but neither a profile nor a max batch size",
        input.name
    );
    Ok(())
}

fn check_quantization(graph: &ComputationGraph, config: &BuilderConfig) -> Result<()> {
    match &config.quantization {
        Quantization::None => ensure!(
            !config.has_flag(BuilderFlags::INT8),
            "int8 requested without a calibrator or dynamic ranges"
        ),
        Quantization::ExplicitRanges { .. } => {
            if let Some(missing) = graph.bindings().find(|t| t.dynamic_range.is_none()) {
                bail!("binding `{}` has no dynamic range", missing.name);
            }
        }
        Quantization::Calibrated(calibrator) => {
            ensure!(calibrator.batch_size > 0, "calibrator batch size must be positive");
        }
    }
    Ok(())
}

fn check_target(config: &BuilderConfig, cores: u32) -> Result<()> {
    if config.default_device == DeviceType::Dla {
        let core = config.dla_core.context("accelerator target without a core index")?;
        ensure!(core < cores, "accelerator core {core} not present");
    }
    ensure!(
        !(config.engine_capability == EngineCapability::SafeDla
            && config.has_flag(BuilderFlags::GPU_FALLBACK)),
        "safety-certified accelerator plans cannot fall back to the GPU"
    );
    Ok(())
}

pub struct ReferenceRuntime;

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReferenceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReferenceSession {
    manifest: PlanManifest,
}

impl ReferenceSession {
    pub fn config(&self) -> &BuilderConfig {
        &self.manifest.config
    }

    /// Whether `batch` is accepted for `input` under this plan.
    fn admits_batch(&self, input: &TensorSpec, batch: usize) -> bool {
        let config = &self.manifest.config;
        if let Some(bounds) = config
            .profile
            .as_ref()
            .and_then(|p| p.get(input.name.as_str()))
        {
            return bounds.admits_batch(batch);
        }
        if let Some(max) = config.max_batch_size {
            return (1..=max as usize).contains(&batch);
        }
        match input.dims.first() {
            Some(Some(d)) => *d == batch,
            _ => false,
        }
    }

    fn output_shape(&self, output: &TensorSpec, batch: usize) -> Result<Shape> {
        let batched = self.manifest.config.profile.is_some()
            || self.manifest.config.max_batch_size.is_some();
        let dims = output
            .dims
            .iter()
            .enumerate()
            .map(|(i, d)| match (i, d) {
                (0, None) => Ok(batch),
                (0, Some(_)) if batched => Ok(batch),
                (_, Some(d)) => Ok(*d),
                (_, None) => bail!(
                    "output `{}` {} has a dynamic non-batch dimension",
                    output.name,
                    output.dims_display()
                ),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Shape::from_slice(&dims))
    }
}

impl PlanRuntime for ReferenceRuntime {
    type Session = ReferenceSession;

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn load(&self, plan: &CompiledPlan, device: Device) -> Result<Self::Session> {
        ensure!(
            device == Device::Cpu,
            "reference runtime only replays on the host, got {device:?}"
        );
        let manifest = PlanManifest::decode(plan)?;
        Ok(ReferenceSession { manifest })
    }
}

impl PlanSession for ReferenceSession {
    fn graph(&self) -> &ComputationGraph {
        &self.manifest.graph
    }

    fn infer(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let specs = &self.manifest.graph.inputs;
        ensure!(
            inputs.len() == specs.len(),
            "expected {} inputs, got {}",
            specs.len(),
            inputs.len()
        );

        let mut batch = None;
        for (spec, input) in specs.iter().zip(&inputs) {
            let shape = &input.desc.shape;
            ensure!(
                input.desc.dtype == spec.dtype,
                "input `{}` expects {}, got {}",
                spec.name,
                spec.dtype,
                input.desc.dtype
            );
            ensure!(
                shape.rank() == spec.rank(),
                "input `{}` expects rank {}, got shape {shape}",
                spec.name,
                spec.rank()
            );
            for (i, (want, got)) in spec.dims.iter().zip(shape.dims()).enumerate().skip(1) {
                if let Some(want) = want {
                    ensure!(
                        want == got,
                        "input `{}` dimension {i} must be {want}, got {got}",
                        spec.name
                    );
                }
            }
            let expected_bytes = shape.numel() * spec.dtype.byte_size();
            ensure!(
                input.byte_len() == expected_bytes,
                "input `{}` byte size mismatch: got {}, expected {expected_bytes}",
                spec.name,
                input.byte_len()
            );

            if let Some(n) = shape.batch() {
                ensure!(
                    self.admits_batch(spec, n),
                    "batch size {n} for input `{}` is outside the plan's supported range",
                    spec.name
                );
                match batch {
                    None => batch = Some(n),
                    Some(b) => ensure!(b == n, "inputs disagree on batch size: {b} vs {n}"),
                }
            }
        }

        let batch = batch.unwrap_or(1);
        self.manifest
            .graph
            .outputs
            .iter()
            .map(|output| Ok(Tensor::zeros(output.dtype, self.output_shape(output, batch)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use planforge_core::{DType, OptimizationProfile, ShapeBounds, TensorSpec};

    use super::*;

    fn graph() -> ComputationGraph {
        ComputationGraph::new(
            vec![TensorSpec::new("x", DType::F32, vec![None, Some(4)])],
            vec![TensorSpec::new("y", DType::F32, vec![None, Some(2)])],
        )
    }

    fn profile(min: usize, opt: usize, max: usize) -> OptimizationProfile {
        let mut profile = OptimizationProfile::new();
        profile.set_dimensions(
            "x".into(),
            ShapeBounds {
                min: Shape::from_slice(&[min, 4]),
                opt: Shape::from_slice(&[opt, 4]),
                max: Shape::from_slice(&[max, 4]),
            },
        );
        profile
    }

    #[test]
    fn dynamic_batch_needs_profile_or_max_batch() {
        let compiler = ReferenceCompiler::new();
        let err = compiler
            .compile(&graph(), &BuilderConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("dynamic batch"), "{err}");

        let config = BuilderConfig {
            max_batch_size: Some(8),
            ..Default::default()
        };
        compiler.compile(&graph(), &config).unwrap();
    }

    #[test]
    fn manifest_survives_encoding() -> Result<()> {
        let config = BuilderConfig {
            profile: Some(profile(1, 2, 4)),
            flags: BuilderFlags::FP16,
            ..Default::default()
        };
        let plan = ReferenceCompiler::new().compile(&graph(), &config)?;
        assert!(plan.data().starts_with(PLAN_MAGIC));
        let manifest = PlanManifest::decode(&plan)?;
        assert_eq!(manifest.config, config);
        assert_eq!(manifest.graph, graph());
        Ok(())
    }

    #[test]
    fn rejects_foreign_plans() {
        let plan = CompiledPlan::new("tensorrt", b"PFPLAN01{}".to_vec());
        assert!(PlanManifest::decode(&plan).is_err());
        let plan = CompiledPlan::new(BACKEND_NAME, b"garbage".to_vec());
        assert!(PlanManifest::decode(&plan).is_err());
    }

    #[test]
    fn int8_flag_without_scale_source_is_rejected() {
        let config = BuilderConfig {
            flags: BuilderFlags::INT8,
            max_batch_size: Some(1),
            ..Default::default()
        };
        assert!(ReferenceCompiler::new().compile(&graph(), &config).is_err());
    }

    #[test]
    fn safe_dla_cannot_fall_back() {
        let config = BuilderConfig {
            max_batch_size: Some(1),
            default_device: DeviceType::Dla,
            dla_core: Some(0),
            engine_capability: EngineCapability::SafeDla,
            flags: BuilderFlags::GPU_FALLBACK,
            ..Default::default()
        };
        let compiler = ReferenceCompiler::with_accelerator_cores(1);
        let err = compiler.compile(&graph(), &config).unwrap_err();
        assert!(err.to_string().contains("cannot fall back"), "{err}");
    }

    #[test]
    fn fixed_batch_replay_caps_batch() -> Result<()> {
        let config = BuilderConfig {
            max_batch_size: Some(4),
            ..Default::default()
        };
        let plan = ReferenceCompiler::new().compile(&graph(), &config)?;
        let mut session = ReferenceRuntime::new().load(&plan, Device::Cpu)?;

        let out = session.infer(vec![Tensor::zeros(DType::F32, Shape::from_slice(&[3, 4]))])?;
        assert_eq!(out[0].desc.shape.dims(), &[3, 2]);

        let err = session
            .infer(vec![Tensor::zeros(DType::F32, Shape::from_slice(&[5, 4]))])
            .unwrap_err();
        assert!(err.to_string().contains("outside"), "{err}");
        Ok(())
    }

    #[test]
    fn replay_checks_dtype_and_static_dims() -> Result<()> {
        let config = BuilderConfig {
            profile: Some(profile(1, 2, 4)),
            ..Default::default()
        };
        let plan = ReferenceCompiler::new().compile(&graph(), &config)?;
        let mut session = ReferenceRuntime::new().load(&plan, Device::Cpu)?;

        assert!(session
            .infer(vec![Tensor::zeros(DType::F16, Shape::from_slice(&[2, 4]))])
            .is_err());
        assert!(session
            .infer(vec![Tensor::zeros(DType::F32, Shape::from_slice(&[2, 5]))])
            .is_err());
        assert!(session.infer(vec![]).is_err());
        Ok(())
    }

    #[test]
    fn host_only() -> Result<()> {
        let config = BuilderConfig {
            max_batch_size: Some(1),
            ..Default::default()
        };
        let plan = ReferenceCompiler::new().compile(&graph(), &config)?;
        assert!(ReferenceRuntime::new()
            .load(&plan, Device::Cuda { device_id: 0 })
            .is_err());
        Ok(())
    }
}
