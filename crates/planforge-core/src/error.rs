//! Failures surfaced by the build pipeline.

use std::fmt;

/// Which side of the graph a binding lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoSide {
    Input,
    Output,
}

impl fmt::Display for IoSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoSide::Input => f.write_str("input"),
            IoSide::Output => f.write_str("output"),
        }
    }
}

/// Every way a build can stop. The pipeline halts at the first one.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An input has a dynamic dimension the pipeline cannot profile.
    #[error("invalid shape for input `{tensor}`: {reason}")]
    ShapeValidation { tensor: String, reason: String },

    /// A dynamic input has no caller-supplied min/opt/max bounds.
    #[error("dynamic dimensions required for input `{tensor}`: no shape bounds supplied")]
    MissingProfile { tensor: String },

    /// The assembled optimization profile is internally inconsistent.
    #[error("optimization profile is invalid: {reason}")]
    ProfileValidation { reason: String },

    /// The requested accelerator core does not exist on this machine.
    #[error("cannot target accelerator core {requested}: only {available} available")]
    DeviceUnavailable { requested: u32, available: u32 },

    /// Explicit quantization scales could not be assigned.
    #[error("cannot set quantization scale for `{tensor}`: {reason}")]
    Calibration { tensor: String, reason: String },

    /// The compiler backend rejected the configuration.
    #[error("{backend} failed to compile plan: {reason}")]
    CompilationFailure { backend: String, reason: String },

    /// Both a fixed batch size and dynamic shape bounds were supplied.
    #[error(
        "fixed batch size {max_batch} conflicts with {bounds} dynamic shape bound(s); supply one or the other"
    )]
    ConflictingBatchMode { max_batch: u32, bounds: usize },

    /// A non-empty format override list does not cover every binding.
    #[error("{side} format overrides cover {got} tensor(s) but the graph has {expected}")]
    FormatCountMismatch {
        side: IoSide,
        expected: usize,
        got: usize,
    },
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
