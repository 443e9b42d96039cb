use planforge_core::{BuildResult, BuilderFlags};
use tracing::debug;

use crate::{BuildContext, BuildStage, BuildState};

/// Sets the FP16 and INT8 builder flags. Both may be on at once.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrecisionConfigurer;

impl BuildStage for PrecisionConfigurer {
    fn name(&self) -> &'static str {
        "precision"
    }

    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()> {
        if ctx.build.fp16 {
            state.config.set_flag(BuilderFlags::FP16);
        }
        if ctx.build.int8 {
            state.config.set_flag(BuilderFlags::INT8);
        }
        debug!(flags = ?state.config.flags, "precision configured");
        Ok(())
    }
}
