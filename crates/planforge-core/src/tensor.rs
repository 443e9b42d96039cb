use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda {
        device_id: u32,
    },
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        if raw.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }

        if let Some(rest) = raw.strip_prefix("cuda:") {
            let device_id: u32 = rest
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid cuda device id: {rest}"))?;
            return Ok(Device::Cuda { device_id });
        }

        bail!("unsupported device: {raw} (expected cpu or cuda:N)");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    I8,
    U8,
    Bool,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_quantized(self) -> bool {
        self == DType::I8
    }

    fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "fp32",
            DType::F16 => "fp16",
            DType::I64 => "int64",
            DType::I32 => "int32",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        Ok(match raw.to_ascii_lowercase().as_str() {
            "fp32" | "f32" | "float" => DType::F32,
            "fp16" | "f16" | "half" => DType::F16,
            "int64" | "i64" => DType::I64,
            "int32" | "i32" => DType::I32,
            "int8" | "i8" => DType::I8,
            "uint8" | "u8" => DType::U8,
            "bool" => DType::Bool,
            other => bail!("unknown data type: {other}"),
        })
    }
}

/// Concrete tensor extents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
    pub fn batch(&self) -> Option<usize> {
        self.0.first().copied()
    }

    /// Copy of this shape with dimension 0 replaced.
    pub fn with_batch(&self, batch: usize) -> Self {
        let mut dims = self.0.clone();
        if let Some(first) = dims.first_mut() {
            *first = batch;
        }
        Self(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.0 {
            if !first {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Shape {
    type Err = anyhow::Error;

    /// Parses `1x3x224x224`.
    fn from_str(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("empty shape");
        }
        let dims = raw
            .split('x')
            .map(|d| {
                d.trim()
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("invalid dimension `{d}` in shape `{raw}`"))
            })
            .collect::<anyhow::Result<SmallVec<[usize; 6]>>>()?;
        Ok(Self(dims))
    }
}

#[derive(Clone, Debug)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    pub device: Device,
}

/// Host-resident tensor handed to and returned from plan replay.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub bytes: Bytes,
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, bytes: Bytes) -> Self {
        Self {
            desc: TensorDesc {
                dtype,
                shape,
                device: Device::Cpu,
            },
            bytes,
        }
    }

    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        let byte_len = shape.numel() * dtype.byte_size();
        Self::from_cpu_bytes(dtype, shape, Bytes::from(vec![0u8; byte_len]))
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_parses_and_prints_x_separated() -> anyhow::Result<()> {
        let shape: Shape = "8x3x224x224".parse()?;
        assert_eq!(shape.dims(), &[8, 3, 224, 224]);
        assert_eq!(shape.to_string(), "8x3x224x224");
        assert_eq!(shape.with_batch(1).batch(), Some(1));
        assert!("8x?x3".parse::<Shape>().is_err());
        assert!("".parse::<Shape>().is_err());
        Ok(())
    }

    #[test]
    fn device_parse() -> anyhow::Result<()> {
        assert_eq!("cpu".parse::<Device>()?, Device::Cpu);
        assert_eq!("cuda:2".parse::<Device>()?, Device::Cuda { device_id: 2 });
        assert!("tpu:0".parse::<Device>().is_err());
        Ok(())
    }

    #[test]
    fn zeros_allocates_full_buffer() {
        let t = Tensor::zeros(DType::F16, Shape::from_slice(&[2, 3]));
        assert_eq!(t.byte_len(), 12);
        assert!(t.bytes.iter().all(|b| *b == 0));
    }
}
