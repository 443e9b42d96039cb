use planforge_core::{
    BuildError, BuildResult, Calibrator, ComputationGraph, ExplicitScaleReason, IoSide,
    Quantization, ScaleTable, TensorSpec,
};
use tracing::{debug, info};

use crate::{BuildContext, BuildStage, BuildState};

/// Decides where INT8 scales come from.
///
/// Explicit ranges are written onto every binding when INT8 is requested
/// without calibration data, or when any I/O override is INT8 (calibration
/// cannot produce scales for quantized I/O). Otherwise INT8 gets a
/// calibrator bound to the calibration data.
#[derive(Clone, Copy, Debug, Default)]
pub struct CalibrationSelector;

impl BuildStage for CalibrationSelector {
    fn name(&self) -> &'static str {
        "calibration"
    }

    fn apply(&self, ctx: &BuildContext<'_>, state: &mut BuildState) -> BuildResult<()> {
        let build = ctx.build;
        let quantized_io = build.has_quantized_io();
        let uncalibrated = build.int8 && build.calibration.is_none();

        if uncalibrated || quantized_io {
            let reason = if quantized_io {
                ExplicitScaleReason::QuantizedIo
            } else {
                ExplicitScaleReason::NoCalibrationData
            };
            set_tensor_scales(&mut state.graph, &build.scales)?;
            info!(?reason, "using explicit dynamic ranges");
            state.config.quantization = Quantization::ExplicitRanges { reason };
        } else if let (true, Some(data)) = (build.int8, build.calibration.as_ref()) {
            let calibrator = Calibrator::new(data);
            info!(
                data = %calibrator.data.display(),
                batch_size = calibrator.batch_size,
                "attached int8 calibrator"
            );
            state.config.quantization = Quantization::Calibrated(calibrator);
        }
        Ok(())
    }
}

/// Writes a symmetric dynamic range onto every input and output.
///
/// Ranges are looked up by name first, then by side default. All bindings
/// are resolved before any is written.
pub fn set_tensor_scales(graph: &mut ComputationGraph, scales: &ScaleTable) -> BuildResult<()> {
    let inputs = graph
        .inputs
        .iter()
        .map(|t| range_for(t, IoSide::Input, scales))
        .collect::<BuildResult<Vec<_>>>()?;
    let outputs = graph
        .outputs
        .iter()
        .map(|t| range_for(t, IoSide::Output, scales))
        .collect::<BuildResult<Vec<_>>>()?;

    for (tensor, range) in graph.inputs.iter_mut().zip(inputs) {
        tensor.dynamic_range = Some(range);
    }
    for (tensor, range) in graph.outputs.iter_mut().zip(outputs) {
        tensor.dynamic_range = Some(range);
    }
    Ok(())
}

fn range_for(tensor: &TensorSpec, side: IoSide, scales: &ScaleTable) -> BuildResult<f32> {
    let fallback = match side {
        IoSide::Input => scales.input_default,
        IoSide::Output => scales.output_default,
    };
    let Some(range) = scales
        .per_tensor
        .get(tensor.name.as_str())
        .copied()
        .or(fallback)
    else {
        return Err(BuildError::Calibration {
            tensor: tensor.name.to_string(),
            reason: format!("no scale data for {side} and no {side} default configured"),
        });
    };
    if !range.is_finite() || range <= 0.0 {
        return Err(BuildError::Calibration {
            tensor: tensor.name.to_string(),
            reason: format!("dynamic range must be finite and positive, got {range}"),
        });
    }
    debug!(tensor = %tensor.name, %side, range, "set dynamic range");
    Ok(range)
}
