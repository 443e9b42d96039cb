use planforge_core::{BuildError, BuildResult, BuilderFlags, DeviceType, EngineCapability};
use tracing::{debug, info};

use crate::{BuildContext, BuildStage, BuildState};

/// Targets the GPU or a fixed-function accelerator core.
///
/// Runs after [`PrecisionConfigurer`](crate::PrecisionConfigurer): an
/// accelerator build without INT8 is forced to FP16.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceleratorTargetSelector;

impl BuildStage for AcceleratorTargetSelector {
    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()> {
        let dla_core = ctx.system.dla_core;
        if let Some(core) = dla_core {
            if core >= ctx.accelerator_cores {
                return Err(BuildError::DeviceUnavailable {
                    requested: core,
                    available: ctx.accelerator_cores,
                });
            }
        }

        let config = &mut state.config;
        config.gpu_device = ctx.system.device;

        if ctx.build.safe {
            config.engine_capability = if dla_core.is_some() {
                EngineCapability::SafeDla
            } else {
                EngineCapability::SafeGpu
            };
            debug!(capability = ?config.engine_capability, "safety-certified build");
        }

        let Some(core) = dla_core else {
            return Ok(());
        };

        config.default_device = DeviceType::Dla;
        config.dla_core = Some(core);
        config.set_flag(BuilderFlags::STRICT_TYPES);
        if ctx.system.allow_gpu_fallback {
            config.set_flag(BuilderFlags::GPU_FALLBACK);
        }
        if !ctx.build.int8 {
            config.set_flag(BuilderFlags::FP16);
        }
        info!(
            core,
            fallback = ctx.system.allow_gpu_fallback,
            flags = ?config.flags,
            "targeting accelerator core"
        );
        Ok(())
    }
}
