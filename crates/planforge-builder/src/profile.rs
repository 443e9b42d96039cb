use planforge_core::{
    BuildError, BuildResult, OptimizationProfile, ShapeBounds, TensorSpec,
};
use tracing::{debug, info};

use crate::{BuildContext, BuildStage, BuildState};

/// Chooses between fixed-batch and dynamic-batch compilation.
///
/// Fixed batch records `max_batch_size` and builds no profile. Dynamic batch
/// marks dimension 0 of every input dynamic and registers min/opt/max shapes
/// taken from the caller's bounds table. Only the batch dimension may be
/// dynamic.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeProfileBuilder;

impl BuildStage for ShapeProfileBuilder {
    fn name(&self) -> &'static str {
        "shapes"
    }

    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()> {
        if let Some(batch) = ctx.build.fixed_batch() {
            debug!(batch, "fixed batch size");
            state.config.max_batch_size = Some(batch);
            return Ok(());
        }
        if !ctx.build.dynamic_batch() {
            return Ok(());
        }

        // Resolve every input before touching any declaration.
        let mut resolved = Vec::with_capacity(state.graph.inputs.len());
        for input in &state.graph.inputs {
            check_batch_only_dynamic(input)?;
            let requested = ctx.build.shapes.get(input.name.as_str()).ok_or_else(|| {
                BuildError::MissingProfile {
                    tensor: input.name.to_string(),
                }
            })?;
            resolved.push(bounds_for(input, requested)?);
        }

        let mut profile = OptimizationProfile::new();
        for (input, bounds) in state.graph.inputs.iter_mut().zip(resolved) {
            debug!(
                tensor = %input.name,
                min = %bounds.min,
                opt = %bounds.opt,
                max = %bounds.max,
                "registered shape bounds"
            );
            input.dims[0] = None;
            profile.set_dimensions(input.name.clone(), bounds);
        }

        profile.validate()?;
        info!(entries = profile.len(), "optimization profile attached");
        state.config.profile = Some(profile);
        Ok(())
    }
}

fn check_batch_only_dynamic(input: &TensorSpec) -> BuildResult<()> {
    if input.rank() == 0 {
        return Err(BuildError::ShapeValidation {
            tensor: input.name.to_string(),
            reason: "scalar inputs have no batch dimension".to_string(),
        });
    }
    let dynamic = input.dynamic_non_batch_dims();
    if !dynamic.is_empty() {
        return Err(BuildError::ShapeValidation {
            tensor: input.name.to_string(),
            reason: format!(
                "dimension(s) {dynamic:?} of {} are dynamic; only the batch dimension may be",
                input.dims_display()
            ),
        });
    }
    Ok(())
}

/// Copies the declared shape three times, substituting the requested batch
/// extents. Only dimension 0 of the requested bounds is consulted.
fn bounds_for(input: &TensorSpec, requested: &ShapeBounds) -> BuildResult<ShapeBounds> {
    let batch_of = |shape: &planforge_core::Shape, which: &str| {
        shape.batch().ok_or_else(|| BuildError::ProfileValidation {
            reason: format!("`{}`: {which} bound has no batch dimension", input.name),
        })
    };
    let min = batch_of(&requested.min, "min")?;
    let opt = batch_of(&requested.opt, "opt")?;
    let max = batch_of(&requested.max, "max")?;

    let with_batch = |batch| {
        input
            .shape_with_batch(batch)
            .ok_or_else(|| BuildError::ShapeValidation {
                tensor: input.name.to_string(),
                reason: "non-batch dimensions must be static".to_string(),
            })
    };
    Ok(ShapeBounds {
        min: with_batch(min)?,
        opt: with_batch(opt)?,
        max: with_batch(max)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use planforge_core::{BuildOptions, ComputationGraph, DType, Shape, SystemOptions};

    use super::*;

    fn bounds(min: usize, opt: usize, max: usize) -> ShapeBounds {
        ShapeBounds {
            min: Shape::from_slice(&[min, 3]),
            opt: Shape::from_slice(&[opt, 3]),
            max: Shape::from_slice(&[max, 3]),
        }
    }

    fn run(
        graph: &ComputationGraph,
        build: &BuildOptions,
    ) -> (BuildState, BuildResult<()>) {
        let system = SystemOptions::default();
        let ctx = BuildContext {
            build,
            system: &system,
            accelerator_cores: 0,
        };
        let mut state = BuildState::new(graph);
        let result = ShapeProfileBuilder.apply(&ctx, &mut state);
        (state, result)
    }

    fn two_inputs(second: Vec<Option<usize>>) -> ComputationGraph {
        ComputationGraph::new(
            vec![
                TensorSpec::new("images", DType::F32, vec![Some(1), Some(3), Some(224), Some(224)]),
                TensorSpec::new("mask", DType::F32, second),
            ],
            vec![],
        )
    }

    fn table(entries: &[(&str, ShapeBounds)]) -> BTreeMap<String, ShapeBounds> {
        entries
            .iter()
            .map(|(n, b)| (n.to_string(), b.clone()))
            .collect()
    }

    #[test]
    fn fixed_batch_builds_no_profile() {
        let build = BuildOptions {
            max_batch: Some(16),
            ..Default::default()
        };
        let graph = two_inputs(vec![Some(1), Some(8)]);
        let (state, result) = run(&graph, &build);
        result.unwrap();
        assert_eq!(state.config.max_batch_size, Some(16));
        assert!(state.config.profile.is_none());
        assert_eq!(state.graph, graph);
    }

    #[test]
    fn no_bounds_and_no_batch_is_a_no_op() {
        let graph = two_inputs(vec![Some(1), Some(8)]);
        let (state, result) = run(&graph, &BuildOptions::default());
        result.unwrap();
        assert!(state.config.profile.is_none());
        assert!(state.config.max_batch_size.is_none());
    }

    #[test]
    fn substitutes_batch_into_declared_shape() {
        let graph = two_inputs(vec![Some(1), Some(8)]);
        let build = BuildOptions {
            shapes: table(&[("images", bounds(1, 8, 32)), ("mask", bounds(2, 4, 6))]),
            ..Default::default()
        };
        let (state, result) = run(&graph, &build);
        result.unwrap();

        let profile = state.config.profile.as_ref().unwrap();
        assert_eq!(profile.len(), 2);
        let images = profile.get("images").unwrap();
        assert_eq!(images.min.dims(), &[1, 3, 224, 224]);
        assert_eq!(images.opt.dims(), &[8, 3, 224, 224]);
        assert_eq!(images.max.dims(), &[32, 3, 224, 224]);
        // Only the batch extent of the requested bounds is used.
        assert_eq!(profile.get("mask").unwrap().max.dims(), &[6, 8]);

        for input in &state.graph.inputs {
            assert_eq!(input.dims[0], None);
            assert!(input.dims[1..].iter().all(Option::is_some));
        }
    }

    #[test]
    fn non_batch_dynamic_dim_fails_without_mutation() {
        let graph = two_inputs(vec![Some(1), None]);
        let build = BuildOptions {
            shapes: table(&[("images", bounds(1, 8, 32)), ("mask", bounds(1, 8, 32))]),
            ..Default::default()
        };
        let (state, result) = run(&graph, &build);
        match result {
            Err(BuildError::ShapeValidation { tensor, .. }) => assert_eq!(tensor, "mask"),
            other => panic!("expected shape validation error, got {other:?}"),
        }
        assert_eq!(state.graph, graph);
        assert!(state.config.profile.is_none());
    }

    #[test]
    fn missing_bounds_name_the_tensor() {
        let graph = two_inputs(vec![Some(1), Some(8)]);
        let build = BuildOptions {
            shapes: table(&[("images", bounds(1, 8, 32))]),
            ..Default::default()
        };
        let (state, result) = run(&graph, &build);
        match result {
            Err(BuildError::MissingProfile { tensor }) => assert_eq!(tensor, "mask"),
            other => panic!("expected missing profile error, got {other:?}"),
        }
        assert_eq!(state.graph, graph);
    }

    #[test]
    fn inverted_bounds_fail_profile_validation() {
        let graph = ComputationGraph::new(
            vec![TensorSpec::new("x", DType::F32, vec![None, Some(3)])],
            vec![],
        );
        let build = BuildOptions {
            shapes: table(&[("x", bounds(32, 8, 1))]),
            ..Default::default()
        };
        let (_, result) = run(&graph, &build);
        assert!(matches!(result, Err(BuildError::ProfileValidation { .. })));
    }

    #[test]
    fn scalar_input_cannot_be_batched() {
        let graph = ComputationGraph::new(vec![TensorSpec::new("s", DType::F32, vec![])], vec![]);
        let build = BuildOptions {
            shapes: table(&[("s", bounds(1, 1, 1))]),
            ..Default::default()
        };
        let (_, result) = run(&graph, &build);
        assert!(matches!(result, Err(BuildError::ShapeValidation { .. })));
    }
}
