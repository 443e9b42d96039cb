use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "planforge", version, about = "Compile ONNX models into device plans")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a plan from a model
    Build(BuildArgs),

    /// Replay a plan once with zero-filled inputs
    Run(RunArgs),

    /// Print a model's inputs and outputs
    Inspect {
        /// Path to an ONNX model or JSON graph description
        model: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Host-only reference compiler
    #[default]
    Reference,
    /// TensorRT through ONNX Runtime (needs the `tensorrt` feature)
    Tensorrt,
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Path to an ONNX model or JSON graph description
    #[arg(long)]
    pub model: PathBuf,

    /// Where to write the compiled plan
    #[arg(long)]
    pub output: PathBuf,

    /// TOML file with [build] and [system] tables; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = BackendKind::Reference)]
    pub backend: BackendKind,

    /// Fixed batch size (conflicts with shape bounds)
    #[arg(long)]
    pub max_batch: Option<u32>,

    /// Shapes used for min, opt and max: name:1x3x224x224[,...]
    #[arg(long)]
    pub shapes: Option<String>,

    #[arg(long)]
    pub min_shapes: Option<String>,

    #[arg(long)]
    pub opt_shapes: Option<String>,

    #[arg(long)]
    pub max_shapes: Option<String>,

    /// Per-input formats, positional: fp16:chw2+hwc8[,...]
    #[arg(long)]
    pub input_io_formats: Option<String>,

    /// Per-output formats, positional
    #[arg(long)]
    pub output_io_formats: Option<String>,

    /// Workspace budget in MiB
    #[arg(long)]
    pub workspace: Option<u64>,

    #[arg(long)]
    pub fp16: bool,

    #[arg(long)]
    pub int8: bool,

    /// Calibration data for int8
    #[arg(long)]
    pub calib: Option<PathBuf>,

    /// Build a safety-certified plan
    #[arg(long)]
    pub safe: bool,

    /// GPU ordinal
    #[arg(long)]
    pub device: Option<u32>,

    /// Target this DLA core
    #[arg(long)]
    pub use_dla_core: Option<u32>,

    /// Let layers the DLA cannot run fall back to the GPU
    #[arg(long)]
    pub allow_gpu_fallback: bool,

    /// DLA cores present on the target
    #[arg(long, default_value_t = 0)]
    pub dla_cores: u32,

    /// Engine cache directory for the tensorrt backend
    #[arg(long)]
    pub engine_cache: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan written by `planforge build --backend reference`
    #[arg(long)]
    pub plan: PathBuf,

    /// Batch size for the zero-filled inputs
    #[arg(long, default_value_t = 1)]
    pub batch: usize,

    /// Device to replay on (cpu or cuda:N)
    #[arg(long, default_value = "cpu")]
    pub device: String,
}
