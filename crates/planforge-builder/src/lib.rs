//! Build-configuration pipeline: resolves build and system options against a
//! computation graph into one [`BuilderConfig`] and hands it to a
//! [`PlanCompiler`].
//!
//! Stages run in a fixed order, each over the same [`BuildState`]:
//! formats, shapes, precision, calibration, accelerator. The accelerator
//! stage must follow the precision stage because it may force FP16 on.
//!
//! [`BuilderConfig`]: planforge_core::BuilderConfig
//! [`PlanCompiler`]: planforge_core::PlanCompiler

pub mod accelerator;
pub mod calibration;
pub mod compiler;
pub mod format;
pub mod precision;
pub mod profile;
pub mod stage;
pub mod state;

pub use accelerator::*;
pub use calibration::*;
pub use compiler::*;
pub use format::*;
pub use precision::*;
pub use profile::*;
pub use stage::*;
pub use state::*;
