use std::path::{Path, PathBuf};

use bytes::Bytes;

#[derive(Clone, Debug)]
pub enum ModelArtifact {
    OnnxPath(PathBuf),
    GraphJsonPath(PathBuf),
    PlanPath(PathBuf),
}

impl ModelArtifact {
    /// Classify a path by extension. Anything that is not `.onnx` or `.json`
    /// is treated as a serialized plan.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match extension(&path).as_deref() {
            Some("onnx") => Self::OnnxPath(path),
            Some("json") => Self::GraphJsonPath(path),
            _ => Self::PlanPath(path),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::OnnxPath(p) | Self::GraphJsonPath(p) | Self::PlanPath(p) => p,
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Serialized output of a compiler backend.
///
/// The bytes are opaque to everything except the backend that produced them
/// and its matching runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledPlan {
    backend: String,
    data: Bytes,
}

impl CompiledPlan {
    pub fn new(backend: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            backend: backend.into(),
            data: data.into(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_kind_follows_extension() {
        assert!(matches!(
            ModelArtifact::from_path("models/resnet.ONNX"),
            ModelArtifact::OnnxPath(_)
        ));
        assert!(matches!(
            ModelArtifact::from_path("graphs/mlp.json"),
            ModelArtifact::GraphJsonPath(_)
        ));
        assert!(matches!(
            ModelArtifact::from_path("out/resnet.plan"),
            ModelArtifact::PlanPath(_)
        ));
    }
}
