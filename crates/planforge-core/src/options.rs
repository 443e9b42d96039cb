use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{Shape, ShapeBounds, TensorFormat};

/// Workspace budget used when none is configured, in MiB.
pub const DEFAULT_WORKSPACE_MIB: u64 = 16;

/// Dynamic range applied to inputs without an explicit entry.
pub const DEFAULT_INPUT_RANGE: f32 = 2.0;

/// Dynamic range applied to outputs without an explicit entry.
pub const DEFAULT_OUTPUT_RANGE: f32 = 4.0;

/// What the caller asked the builder to produce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    /// Fixed batch size. Mutually exclusive with `shapes`.
    pub max_batch: Option<u32>,
    /// Dynamic shape bounds keyed by input name.
    pub shapes: BTreeMap<String, ShapeBounds>,
    /// Per-input overrides, positional. Empty means defaults everywhere.
    pub input_formats: Vec<TensorFormat>,
    /// Per-output overrides, positional. Empty means defaults everywhere.
    pub output_formats: Vec<TensorFormat>,
    pub workspace_mib: u64,
    pub fp16: bool,
    pub int8: bool,
    /// Calibration data for INT8. The calibrator reads and caches through it.
    pub calibration: Option<PathBuf>,
    /// Restrict the plan to the safety-certified engine subset.
    pub safe: bool,
    /// Scales used when INT8 is built without a calibrator.
    pub scales: ScaleTable,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_batch: None,
            shapes: BTreeMap::new(),
            input_formats: Vec::new(),
            output_formats: Vec::new(),
            workspace_mib: DEFAULT_WORKSPACE_MIB,
            fp16: false,
            int8: false,
            calibration: None,
            safe: false,
            scales: ScaleTable::default(),
        }
    }
}

impl BuildOptions {
    /// Fixed batch size, treating zero as unset.
    pub fn fixed_batch(&self) -> Option<u32> {
        self.max_batch.filter(|b| *b > 0)
    }

    /// Dynamic-batch mode: no fixed batch and at least one shape bound.
    pub fn dynamic_batch(&self) -> bool {
        self.fixed_batch().is_none() && !self.shapes.is_empty()
    }

    pub fn has_quantized_io(&self) -> bool {
        self.input_formats
            .iter()
            .chain(&self.output_formats)
            .any(|f| f.dtype.is_quantized())
    }
}

/// Symmetric dynamic ranges for INT8 bindings built without calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaleTable {
    pub per_tensor: BTreeMap<String, f32>,
    pub input_default: Option<f32>,
    pub output_default: Option<f32>,
}

impl Default for ScaleTable {
    fn default() -> Self {
        Self {
            per_tensor: BTreeMap::new(),
            input_default: Some(DEFAULT_INPUT_RANGE),
            output_default: Some(DEFAULT_OUTPUT_RANGE),
        }
    }
}

impl ScaleTable {
    /// Table with no fallbacks; every binding needs its own entry.
    pub fn strict() -> Self {
        Self {
            per_tensor: BTreeMap::new(),
            input_default: None,
            output_default: None,
        }
    }
}

/// Where the plan should run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemOptions {
    /// GPU ordinal the builder targets.
    pub device: u32,
    /// Fixed-function accelerator core, if any.
    pub dla_core: Option<u32>,
    /// Let layers the accelerator cannot run fall back to the GPU.
    pub allow_gpu_fallback: bool,
}

/// Parses `name:1x3x224x224[,name:...]`.
pub fn parse_shape_spec(raw: &str) -> anyhow::Result<Vec<(String, Shape)>> {
    let mut out = Vec::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let Some((name, dims)) = entry.trim().rsplit_once(':') else {
            bail!("shape `{entry}` must look like <input>:<d0>x<d1>...");
        };
        if name.is_empty() {
            bail!("shape `{entry}` is missing the input name");
        }
        let shape: Shape = dims
            .parse()
            .with_context(|| format!("invalid shape for input `{name}`"))?;
        out.push((name.to_string(), shape));
    }
    Ok(out)
}

/// Merges min/opt/max shape lists into a bounds table. Every name needs an
/// `opt` entry; a missing `min` or `max` falls back to `opt`.
pub fn shape_bounds_from_specs(
    min: &[(String, Shape)],
    opt: &[(String, Shape)],
    max: &[(String, Shape)],
) -> anyhow::Result<BTreeMap<String, ShapeBounds>> {
    let lookup = |list: &[(String, Shape)], name: &str| {
        list.iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    };

    for (name, _) in min.iter().chain(max) {
        if lookup(opt, name).is_none() {
            bail!("input `{name}` has min/max shapes but no optimum shape");
        }
    }

    let mut table = BTreeMap::new();
    for (name, shape) in opt {
        table.insert(
            name.clone(),
            ShapeBounds {
                min: lookup(min, name).unwrap_or_else(|| shape.clone()),
                opt: shape.clone(),
                max: lookup(max, name).unwrap_or_else(|| shape.clone()),
            },
        );
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn defaults_match_builder_expectations() {
        let opts = BuildOptions::default();
        assert_eq!(opts.workspace_mib, DEFAULT_WORKSPACE_MIB);
        assert!(!opts.dynamic_batch());
        assert_eq!(opts.scales.input_default, Some(DEFAULT_INPUT_RANGE));
    }

    #[test]
    fn zero_max_batch_is_unset() {
        let mut opts = BuildOptions {
            max_batch: Some(0),
            ..Default::default()
        };
        assert_eq!(opts.fixed_batch(), None);
        opts.shapes.insert(
            "x".into(),
            ShapeBounds {
                min: Shape::from_slice(&[1]),
                opt: Shape::from_slice(&[1]),
                max: Shape::from_slice(&[1]),
            },
        );
        assert!(opts.dynamic_batch());
    }

    #[test]
    fn quantized_io_detected_on_either_side() -> anyhow::Result<()> {
        let opts = BuildOptions {
            output_formats: vec!["fp32:chw".parse()?, "int8:chw4".parse()?],
            ..Default::default()
        };
        assert!(opts.has_quantized_io());
        assert_eq!(opts.output_formats[1].dtype, DType::I8);
        Ok(())
    }

    #[test]
    fn shape_specs_merge_with_opt_fallback() -> anyhow::Result<()> {
        let min = parse_shape_spec("images:1x3x224x224")?;
        let opt = parse_shape_spec("images:8x3x224x224,mask:4x128")?;
        let max = parse_shape_spec("images:32x3x224x224")?;
        let table = shape_bounds_from_specs(&min, &opt, &max)?;

        let images = &table["images"];
        assert_eq!(images.min.batch(), Some(1));
        assert_eq!(images.opt.batch(), Some(8));
        assert_eq!(images.max.batch(), Some(32));

        let mask = &table["mask"];
        assert_eq!(mask.min, mask.max);
        Ok(())
    }

    #[test]
    fn min_without_opt_is_rejected() -> anyhow::Result<()> {
        let min = parse_shape_spec("images:1x3")?;
        assert!(shape_bounds_from_specs(&min, &[], &[]).is_err());
        assert!(parse_shape_spec("1x3x224").is_err());
        Ok(())
    }

    #[test]
    fn options_load_from_toml() -> anyhow::Result<()> {
        let opts: BuildOptions = toml::from_str(
            r#"
            int8 = true
            calibration = "calib.cache"
            input_formats = ["int8:chw4"]

            [shapes.images]
            min = [1, 3, 224, 224]
            opt = [8, 3, 224, 224]
            max = [32, 3, 224, 224]

            [scales]
            per_tensor = { images = 1.5 }
            "#,
        )?;
        assert!(opts.int8);
        assert!(opts.dynamic_batch());
        assert_eq!(opts.input_formats[0].dtype, DType::I8);
        assert_eq!(opts.scales.per_tensor["images"], 1.5);
        assert_eq!(opts.scales.output_default, Some(DEFAULT_OUTPUT_RANGE));
        assert_eq!(opts.workspace_mib, DEFAULT_WORKSPACE_MIB);
        Ok(())
    }
}
