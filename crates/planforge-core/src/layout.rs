use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::DType;

bitflags! {
    /// Memory layouts a binding is allowed to use.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TensorLayouts: u32 {
        /// Row-major, the canonical layout.
        const LINEAR = 1 << 0;
        const CHW2 = 1 << 1;
        const HWC8 = 1 << 2;
        const CHW4 = 1 << 3;
        const CHW16 = 1 << 4;
        const CHW32 = 1 << 5;
    }
}

const LAYOUT_NAMES: &[(&str, TensorLayouts)] = &[
    ("chw", TensorLayouts::LINEAR),
    ("chw2", TensorLayouts::CHW2),
    ("hwc8", TensorLayouts::HWC8),
    ("chw4", TensorLayouts::CHW4),
    ("chw16", TensorLayouts::CHW16),
    ("chw32", TensorLayouts::CHW32),
];

impl TensorLayouts {
    fn parse_one(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        LAYOUT_NAMES
            .iter()
            .find(|(name, _)| *name == raw)
            .map(|(_, layout)| *layout)
            .with_context(|| format!("unknown tensor layout: {raw}"))
    }
}

/// Data type and allowed layouts for one graph binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TensorFormat {
    pub dtype: DType,
    pub layouts: TensorLayouts,
}

impl TensorFormat {
    pub const fn new(dtype: DType, layouts: TensorLayouts) -> Self {
        Self { dtype, layouts }
    }
}

impl Default for TensorFormat {
    fn default() -> Self {
        Self::new(DType::F32, TensorLayouts::LINEAR)
    }
}

impl fmt::Display for TensorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.dtype)?;
        let mut first = true;
        for (name, layout) in LAYOUT_NAMES {
            if self.layouts.contains(*layout) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for TensorFormat {
    type Err = anyhow::Error;

    /// Parses `fp16:chw2+hwc8`.
    fn from_str(raw: &str) -> anyhow::Result<Self> {
        let Some((dtype, layouts)) = raw.trim().split_once(':') else {
            bail!("tensor format `{raw}` must look like <type>:<layout>[+<layout>]");
        };
        let dtype: DType = dtype.parse()?;
        let mut allowed = TensorLayouts::empty();
        for layout in layouts.split('+') {
            allowed |= TensorLayouts::parse_one(layout)?;
        }
        Ok(Self::new(dtype, allowed))
    }
}

impl TryFrom<String> for TensorFormat {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> anyhow::Result<Self> {
        raw.parse()
    }
}

impl From<TensorFormat> for String {
    fn from(format: TensorFormat) -> Self {
        format.to_string()
    }
}

/// Parses a comma separated list of formats, one per binding.
pub fn parse_formats(raw: &str) -> anyhow::Result<Vec<TensorFormat>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_layout_formats() -> anyhow::Result<()> {
        let formats = parse_formats("fp32:chw, fp16:chw2+hwc8,int8:chw4")?;
        assert_eq!(formats.len(), 3);
        assert_eq!(formats[0], TensorFormat::default());
        assert_eq!(formats[1].dtype, DType::F16);
        assert_eq!(formats[1].layouts, TensorLayouts::CHW2 | TensorLayouts::HWC8);
        assert_eq!(formats[2].dtype, DType::I8);
        assert_eq!(formats[1].to_string(), "fp16:chw2+hwc8");
        Ok(())
    }

    #[test]
    fn rejects_malformed_formats() {
        assert!("fp32".parse::<TensorFormat>().is_err());
        assert!("fp32:nhwc".parse::<TensorFormat>().is_err());
        assert!("fp64:chw".parse::<TensorFormat>().is_err());
    }
}
