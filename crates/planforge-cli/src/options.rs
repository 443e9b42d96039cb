use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use planforge_core::{
    parse_formats, parse_shape_spec, shape_bounds_from_specs, BuildOptions, ShapeBounds,
    SystemOptions,
};
use serde::Deserialize;
use tracing::debug;

use crate::cli::BuildArgs;

/// Layout of the `--config` TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub build: BuildOptions,
    pub system: SystemOptions,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Resolves the options for one build: the config file if given, then flags.
pub fn resolve(args: &BuildArgs) -> Result<(BuildOptions, SystemOptions)> {
    let FileConfig {
        mut build,
        mut system,
    } = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    if let Some(max_batch) = args.max_batch {
        build.max_batch = Some(max_batch);
    }
    if let Some(table) = shape_overrides(args)? {
        build.shapes = table;
    }
    if let Some(raw) = &args.input_io_formats {
        build.input_formats = parse_formats(raw).context("invalid --input-io-formats")?;
    }
    if let Some(raw) = &args.output_io_formats {
        build.output_formats = parse_formats(raw).context("invalid --output-io-formats")?;
    }
    if let Some(workspace) = args.workspace {
        build.workspace_mib = workspace;
    }
    build.fp16 |= args.fp16;
    build.int8 |= args.int8;
    build.safe |= args.safe;
    if let Some(calib) = &args.calib {
        build.calibration = Some(calib.clone());
    }

    if let Some(device) = args.device {
        system.device = device;
    }
    if let Some(core) = args.use_dla_core {
        system.dla_core = Some(core);
    }
    system.allow_gpu_fallback |= args.allow_gpu_fallback;

    debug!(?build, ?system, "resolved options");
    Ok((build, system))
}

/// `--shapes` feeds the optimum list; min and max fall back to it.
fn shape_overrides(args: &BuildArgs) -> Result<Option<BTreeMap<String, ShapeBounds>>> {
    let parse = |raw: &Option<String>, flag: &str| -> Result<Vec<_>> {
        raw.as_deref()
            .map(parse_shape_spec)
            .transpose()
            .with_context(|| format!("invalid --{flag}"))
            .map(Option::unwrap_or_default)
    };

    let mut opt = parse(&args.shapes, "shapes")?;
    opt.extend(parse(&args.opt_shapes, "opt-shapes")?);
    let min = parse(&args.min_shapes, "min-shapes")?;
    let max = parse(&args.max_shapes, "max-shapes")?;
    if opt.is_empty() && min.is_empty() && max.is_empty() {
        return Ok(None);
    }
    shape_bounds_from_specs(&min, &opt, &max).map(Some)
}
