use planforge_core::BuildResult;

use crate::{
    AcceleratorTargetSelector, BuildContext, BuildState, CalibrationSelector,
    PrecisionConfigurer, ShapeProfileBuilder, TensorFormatResolver,
};

/// One step of the build pipeline.
pub trait BuildStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()>;
}

/// The pipeline in execution order.
pub fn default_stages() -> Vec<Box<dyn BuildStage>> {
    vec![
        Box::new(TensorFormatResolver),
        Box::new(ShapeProfileBuilder),
        Box::new(PrecisionConfigurer),
        Box::new(CalibrationSelector),
        Box::new(AcceleratorTargetSelector),
    ]
}
