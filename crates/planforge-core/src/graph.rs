use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DType, Shape, TensorFormat, TensorLayouts};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IOName(pub String);

impl IOName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IOName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Declaration of one graph input or output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    #[serde(default = "default_layouts")]
    pub layouts: TensorLayouts,
    pub dims: Vec<Option<usize>>, // None = dynamic
    /// Symmetric quantization range; `Some(r)` means values span `[-r, r]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_range: Option<f32>,
}

fn default_layouts() -> TensorLayouts {
    TensorLayouts::LINEAR
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, dtype: DType, dims: Vec<Option<usize>>) -> Self {
        Self {
            name: IOName(name.into()),
            dtype,
            layouts: TensorLayouts::LINEAR,
            dims,
            dynamic_range: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn format(&self) -> TensorFormat {
        TensorFormat::new(self.dtype, self.layouts)
    }

    pub fn set_format(&mut self, format: TensorFormat) {
        self.dtype = format.dtype;
        self.layouts = format.layouts;
    }

    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(Option::is_none)
    }

    /// Indices of dynamic dimensions other than the batch dimension.
    pub fn dynamic_non_batch_dims(&self) -> Vec<usize> {
        self.dims
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Concrete shape with the batch dimension pinned to `batch`. Returns
    /// `None` if any other dimension is dynamic.
    pub fn shape_with_batch(&self, batch: usize) -> Option<Shape> {
        let mut dims = smallvec::SmallVec::with_capacity(self.dims.len());
        for (i, d) in self.dims.iter().enumerate() {
            match (i, d) {
                (0, _) => dims.push(batch),
                (_, Some(d)) => dims.push(*d),
                (_, None) => return None,
            }
        }
        Some(Shape(dims))
    }

    pub fn dims_display(&self) -> String {
        let dims = self
            .dims
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
            .collect::<Vec<_>>();
        format!("[{}]", dims.join(", "))
    }
}

/// Input/output declarations of a parsed model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputationGraph {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ComputationGraph {
    pub fn new(inputs: Vec<TensorSpec>, outputs: Vec<TensorSpec>) -> Self {
        Self {
            name: String::new(),
            inputs,
            outputs,
        }
    }

    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|t| t.name.as_str() == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|t| t.name.as_str() == name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &TensorSpec> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_batch_dynamic_dims_are_reported() {
        let spec = TensorSpec::new("x", DType::F32, vec![None, Some(3), None, Some(8)]);
        assert!(spec.is_dynamic());
        assert_eq!(spec.dynamic_non_batch_dims(), vec![2]);
        assert_eq!(spec.shape_with_batch(4), None);
    }

    #[test]
    fn shape_with_batch_pins_dim_zero() {
        let spec = TensorSpec::new("x", DType::F32, vec![None, Some(3), Some(8)]);
        assert_eq!(spec.shape_with_batch(4), Some(Shape::from_slice(&[4, 3, 8])));
        assert_eq!(spec.dims_display(), "[?, 3, 8]");
    }

    #[test]
    fn graph_json_defaults_layouts() -> anyhow::Result<()> {
        let graph: ComputationGraph = serde_json::from_str(
            r#"{
                "inputs": [{ "name": "images", "dtype": "f32", "dims": [null, 3, 224, 224] }],
                "outputs": [{ "name": "logits", "dtype": "f32", "dims": [null, 1000] }]
            }"#,
        )?;
        assert_eq!(graph.inputs[0].layouts, TensorLayouts::LINEAR);
        assert_eq!(graph.input("images").map(TensorSpec::rank), Some(4));
        assert!(graph.output("logits").is_some());
        assert_eq!(graph.bindings().count(), 2);
        Ok(())
    }
}
