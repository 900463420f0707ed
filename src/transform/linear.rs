// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Transform;
use crate::row::ColumnValue;
use serde::{Deserialize, Serialize};

/// Clamp-and-scale normalization for ordered columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearTransformer {
    min: f64,
    max: f64,
}

impl LinearTransformer {
    /// Creates a linear transformer over `[min, max]`.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Lower bound of the fitted domain.
    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound of the fitted domain.
    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Returns `true` if the other domain lies inside this one.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min <= other.min && self.max >= other.max
    }

    /// Union of both domains.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Widens the domain to cover the observed range.
    #[must_use]
    pub fn widened(&self, observed_min: f64, observed_max: f64) -> Self {
        Self::new(self.min.min(observed_min), self.max.max(observed_max))
    }
}

impl Transform for LinearTransformer {
    fn transform(&self, value: &ColumnValue) -> f64 {
        let Some(value) = value.as_f64() else {
            return 0.0;
        };

        let span = self.max - self.min;

        // A degenerate domain maps everything onto the origin; the first
        // differing value widens the transformer through a revision upgrade
        if span <= 0.0 {
            return 0.0;
        }

        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn linear_scales() {
        let t = LinearTransformer::new(0.0, 100.0);

        assert!(t.transform(&0.0f64.into()).abs() < f64::EPSILON);
        assert!((t.transform(&50.0f64.into()) - 0.5).abs() < f64::EPSILON);
        assert!((t.transform(&100.0f64.into()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_clamps_out_of_range() {
        let t = LinearTransformer::new(0.0, 100.0);

        assert!(t.transform(&(-50.0f64).into()).abs() < f64::EPSILON);
        assert!((t.transform(&500.0f64.into()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_degenerate_domain() {
        let t = LinearTransformer::new(7.0, 7.0);
        assert!(t.transform(&7.0f64.into()).abs() < f64::EPSILON);
        assert!(t.transform(&9.0f64.into()).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_handles_integer_types() {
        let t = LinearTransformer::new(0.0, 10.0);
        assert!((t.transform(&5i64.into()) - 0.5).abs() < f64::EPSILON);
        assert!((t.transform(&5i32.into()) - 0.5).abs() < f64::EPSILON);
    }
}
