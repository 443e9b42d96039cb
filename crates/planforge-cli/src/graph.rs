use anyhow::{bail, Context, Result};
use planforge_backend_ort::OrtGraphSource;
use planforge_core::{ComputationGraph, GraphSource, ModelArtifact};
use tracing::debug;

/// Reads a serialized `ComputationGraph` from a JSON file.
pub struct JsonGraphSource;

impl GraphSource for JsonGraphSource {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load_graph(&self, artifact: &ModelArtifact) -> Result<ComputationGraph> {
        let ModelArtifact::GraphJsonPath(path) = artifact else {
            bail!("json graph source expects a .json graph description");
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read graph {}", path.display()))?;
        let mut graph: ComputationGraph = serde_json::from_str(&raw)
            .with_context(|| format!("invalid graph description {}", path.display()))?;
        if graph.name.is_empty() {
            if let Some(stem) = path.file_stem() {
                graph.name = stem.to_string_lossy().into_owned();
            }
        }
        Ok(graph)
    }
}

/// Picks a graph source by artifact kind and imports the graph.
pub fn load_graph(artifact: &ModelArtifact) -> Result<ComputationGraph> {
    let source: &dyn GraphSource = match artifact {
        ModelArtifact::OnnxPath(_) => &OrtGraphSource,
        ModelArtifact::GraphJsonPath(_) => &JsonGraphSource,
        ModelArtifact::PlanPath(path) => {
            bail!(
                "{} is not a model; expected .onnx or .json",
                path.display()
            )
        }
    };
    debug!(source = source.name(), path = %artifact.path().display(), "loading graph");
    source.load_graph(artifact)
}
