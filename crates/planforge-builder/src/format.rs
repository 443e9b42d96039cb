use planforge_core::{BuildResult, TensorFormat, TensorSpec};
use tracing::debug;

use crate::{BuildContext, BuildStage, BuildState};

/// Assigns data type and allowed layouts to every graph binding.
///
/// A non-empty override list applies positionally; an empty one leaves every
/// binding on `fp32:chw`. List lengths are checked before the pipeline runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TensorFormatResolver;

impl BuildStage for TensorFormatResolver {
    fn name(&self) -> &'static str {
        "formats"
    }

    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()> {
        resolve_formats(&mut state.graph.inputs, &ctx.build.input_formats);
        resolve_formats(&mut state.graph.outputs, &ctx.build.output_formats);
        Ok(())
    }
}

fn resolve_formats(tensors: &mut [TensorSpec], overrides: &[TensorFormat]) {
    for (i, tensor) in tensors.iter_mut().enumerate() {
        let format = overrides.get(i).copied().unwrap_or_default();
        debug!(tensor = %tensor.name, %format, "resolved binding format");
        tensor.set_format(format);
    }
}

#[cfg(test)]
mod tests {
    use planforge_core::{
        BuildOptions, ComputationGraph, DType, SystemOptions, TensorLayouts, TensorSpec,
    };

    use super::*;

    fn graph() -> ComputationGraph {
        ComputationGraph::new(
            vec![
                TensorSpec::new("a", DType::F16, vec![Some(1), Some(4)]),
                TensorSpec::new("b", DType::I32, vec![Some(1)]),
            ],
            vec![TensorSpec::new("y", DType::I64, vec![Some(1)])],
        )
    }

    fn run(build: &BuildOptions) -> BuildState {
        let system = SystemOptions::default();
        let ctx = BuildContext {
            build,
            system: &system,
            accelerator_cores: 0,
        };
        let mut state = BuildState::new(&graph());
        TensorFormatResolver.apply(&ctx, &mut state).unwrap();
        state
    }

    #[test]
    fn defaults_to_fp32_linear() {
        let state = run(&BuildOptions::default());
        for tensor in state.graph.bindings() {
            assert_eq!(tensor.dtype, DType::F32);
            assert_eq!(tensor.layouts, TensorLayouts::LINEAR);
        }
    }

    #[test]
    fn overrides_apply_positionally_per_side() {
        let build = BuildOptions {
            input_formats: vec![
                "fp16:chw2".parse().unwrap(),
                "int8:chw4+chw32".parse().unwrap(),
            ],
            ..Default::default()
        };
        let state = run(&build);
        assert_eq!(state.graph.inputs[0].dtype, DType::F16);
        assert_eq!(state.graph.inputs[0].layouts, TensorLayouts::CHW2);
        assert_eq!(state.graph.inputs[1].dtype, DType::I8);
        assert_eq!(
            state.graph.inputs[1].layouts,
            TensorLayouts::CHW4 | TensorLayouts::CHW32
        );
        assert_eq!(state.graph.outputs[0].format(), TensorFormat::default());
    }
}
