use serde::{Deserialize, Serialize};

use crate::{BuildError, BuildResult, IOName, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptProfileSelector {
    Min,
    Opt,
    Max,
}

/// Minimum, optimum and maximum shapes for one dynamic binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeBounds {
    pub min: Shape,
    pub opt: Shape,
    pub max: Shape,
}

impl ShapeBounds {
    pub fn get(&self, selector: OptProfileSelector) -> &Shape {
        match selector {
            OptProfileSelector::Min => &self.min,
            OptProfileSelector::Opt => &self.opt,
            OptProfileSelector::Max => &self.max,
        }
    }

    /// Whether a batch size falls inside `[min, max]`.
    pub fn admits_batch(&self, batch: usize) -> bool {
        match (self.min.batch(), self.max.batch()) {
            (Some(lo), Some(hi)) => (lo..=hi).contains(&batch),
            _ => false,
        }
    }

    fn check(&self, name: &IOName) -> BuildResult<()> {
        let invalid = |reason: String| BuildError::ProfileValidation {
            reason: format!("`{name}`: {reason}"),
        };

        let rank = self.opt.rank();
        if rank == 0 {
            return Err(invalid("bounds have no batch dimension".to_string()));
        }
        if self.min.rank() != rank || self.max.rank() != rank {
            return Err(invalid(format!(
                "rank differs across bounds (min {}, opt {rank}, max {})",
                self.min.rank(),
                self.max.rank()
            )));
        }
        if self.min.0[1..] != self.opt.0[1..] || self.max.0[1..] != self.opt.0[1..] {
            return Err(invalid(format!(
                "non-batch dimensions differ (min {}, opt {}, max {})",
                self.min, self.opt, self.max
            )));
        }

        let (lo, mid, hi) = (self.min.0[0], self.opt.0[0], self.max.0[0]);
        if lo == 0 {
            return Err(invalid("minimum batch must be at least 1".to_string()));
        }
        if !(lo <= mid && mid <= hi) {
            return Err(invalid(format!(
                "batch bounds must satisfy min <= opt <= max, got {lo} / {mid} / {hi}"
            )));
        }
        Ok(())
    }
}

/// Shape bounds keyed by binding name, in graph input order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    entries: Vec<(IOName, ShapeBounds)>,
}

impl OptimizationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers bounds for `name`, replacing any earlier entry.
    pub fn set_dimensions(&mut self, name: IOName, bounds: ShapeBounds) {
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = bounds;
        } else {
            self.entries.push((name, bounds));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ShapeBounds> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, b)| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IOName, &ShapeBounds)> {
        self.entries.iter().map(|(n, b)| (n, b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks the profile as a whole: it must be non-empty and every entry
    /// must have `min <= opt <= max` on the batch dimension with all other
    /// dimensions identical.
    pub fn validate(&self) -> BuildResult<()> {
        if self.entries.is_empty() {
            return Err(BuildError::ProfileValidation {
                reason: "profile has no entries".to_string(),
            });
        }
        for (name, bounds) in &self.entries {
            bounds.check(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min: &[usize], opt: &[usize], max: &[usize]) -> ShapeBounds {
        ShapeBounds {
            min: Shape::from_slice(min),
            opt: Shape::from_slice(opt),
            max: Shape::from_slice(max),
        }
    }

    #[test]
    fn empty_profile_is_invalid() {
        let err = OptimizationProfile::new().validate().unwrap_err();
        assert!(matches!(err, BuildError::ProfileValidation { .. }));
    }

    #[test]
    fn accepts_ordered_batch_bounds() {
        let mut profile = OptimizationProfile::new();
        profile.set_dimensions("x".into(), bounds(&[1, 3], &[8, 3], &[32, 3]));
        profile.validate().unwrap();
        let b = profile.get("x").unwrap();
        assert!(b.admits_batch(1) && b.admits_batch(32));
        assert!(!b.admits_batch(0) && !b.admits_batch(33));
        assert_eq!(b.get(OptProfileSelector::Opt).batch(), Some(8));
    }

    #[test]
    fn rejects_min_above_max() {
        let mut profile = OptimizationProfile::new();
        profile.set_dimensions("x".into(), bounds(&[16, 3], &[8, 3], &[4, 3]));
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("min <= opt <= max"), "{err}");
    }

    #[test]
    fn rejects_zero_batch_and_mismatched_tails() {
        let mut profile = OptimizationProfile::new();
        profile.set_dimensions("x".into(), bounds(&[0, 3], &[1, 3], &[2, 3]));
        assert!(profile.validate().is_err());

        let mut profile = OptimizationProfile::new();
        profile.set_dimensions("x".into(), bounds(&[1, 3], &[1, 4], &[2, 3]));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn set_dimensions_replaces_existing_entry() {
        let mut profile = OptimizationProfile::new();
        profile.set_dimensions("x".into(), bounds(&[1], &[1], &[1]));
        profile.set_dimensions("x".into(), bounds(&[1], &[2], &[4]));
        assert_eq!(profile.len(), 1);
        assert_eq!(profile.get("x").unwrap().max.batch(), Some(4));
    }
}
