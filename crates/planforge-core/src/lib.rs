pub mod artifact;
pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod layout;
pub mod options;
pub mod profile;
pub mod tensor;

pub use artifact::*;
pub use backend::*;
pub use config::*;
pub use error::*;
pub use graph::*;
pub use layout::*;
pub use options::*;
pub use profile::*;
pub use tensor::*;
