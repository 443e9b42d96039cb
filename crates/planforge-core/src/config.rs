use std::path::PathBuf;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::OptimizationProfile;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BuilderFlags: u32 {
        const FP16 = 1 << 0;
        const INT8 = 1 << 1;
        /// Layers must run in the precision they were assigned.
        const STRICT_TYPES = 1 << 2;
        /// Accelerator layers may fall back to the GPU.
        const GPU_FALLBACK = 1 << 3;
    }
}

impl Default for BuilderFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Gpu,
    Dla,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCapability {
    #[default]
    Standard,
    SafeGpu,
    SafeDla,
}

/// Batch granularity the calibrator samples at.
pub const CALIBRATION_BATCH_SIZE: u32 = 1;

/// INT8 calibrator bound to a calibration data reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibrator {
    pub data: PathBuf,
    pub batch_size: u32,
}

impl Calibrator {
    pub fn new(data: impl Into<PathBuf>) -> Self {
        Self {
            data: data.into(),
            batch_size: CALIBRATION_BATCH_SIZE,
        }
    }
}

/// Why explicit ranges were chosen over a calibrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplicitScaleReason {
    /// INT8 was requested without calibration data.
    NoCalibrationData,
    /// A binding override declares INT8 I/O, which calibration cannot serve.
    QuantizedIo,
}

/// How INT8 scales are obtained for this build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    #[default]
    None,
    /// Dynamic ranges are set directly on the bindings.
    ExplicitRanges { reason: ExplicitScaleReason },
    Calibrated(Calibrator),
}

/// Compiler configuration assembled by the build stages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub flags: BuilderFlags,
    /// Fixed batch size; unset in dynamic-batch mode.
    pub max_batch_size: Option<u32>,
    pub max_workspace_size: u64,
    pub profile: Option<OptimizationProfile>,
    pub quantization: Quantization,
    pub engine_capability: EngineCapability,
    pub default_device: DeviceType,
    pub dla_core: Option<u32>,
    pub gpu_device: u32,
}

impl BuilderConfig {
    pub fn set_flag(&mut self, flag: BuilderFlags) {
        self.flags.insert(flag);
    }

    pub fn has_flag(&self, flag: BuilderFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn calibrator(&self) -> Option<&Calibrator> {
        match &self.quantization {
            Quantization::Calibrated(c) => Some(c),
            _ => None,
        }
    }

    pub fn uses_explicit_ranges(&self) -> bool {
        matches!(self.quantization, Quantization::ExplicitRanges { .. })
    }
}
