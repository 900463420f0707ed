// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Number of distinct weights (2^32)
const SPAN: f64 = (u32::MAX as f64) + 1.0;

/// A point on the weight cycle `[i32::MIN, i32::MAX]`.
///
/// Weights are pseudo-random per row, uniform for uniformly-distributed keys,
/// so the set of rows below any cutoff is a uniform sample of the table.
/// `Weight::MAX` doubles as the sentinel for "no cutoff" (open cube).
#[derive(
    Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Weight(pub i32);

impl Weight {
    /// Lowest possible weight.
    pub const MIN: Self = Self(i32::MIN);

    /// Highest possible weight; also the "open cube" sentinel.
    pub const MAX: Self = Self(i32::MAX);

    /// Maps a sample fraction in `[0,1]` to a weight cutoff.
    ///
    /// Fraction 0 maps to [`Weight::MIN`] (empty sample),
    /// fraction 1 maps to [`Weight::MAX`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_fraction(fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let offset = (fraction * SPAN) as i64;
        let value = (i64::from(i32::MIN) + offset).min(i64::from(i32::MAX));
        Self(value as i32)
    }

    /// The fraction of the weight cycle below this weight.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(self) -> f64 {
        (i64::from(self.0) - i64::from(i32::MIN)) as f64 / SPAN
    }

    /// Returns `true` if this weight is the "no cutoff" sentinel.
    #[must_use]
    pub fn is_unbounded(self) -> bool {
        self == Self::MAX
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for Weight {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i32::<BigEndian>(self.0)?;
        Ok(())
    }
}

impl Decode for Weight {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self(reader.read_i32::<BigEndian>()?))
    }
}

/// A half-open weight interval `[from, to)`.
///
/// A `to` of [`Weight::MAX`] is treated as inclusive, so that fraction 1.0
/// covers the full cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WeightRange {
    /// Inclusive lower bound
    pub from: Weight,

    /// Exclusive upper bound (inclusive when it is `Weight::MAX`)
    pub to: Weight,
}

impl WeightRange {
    /// Creates a new weight range.
    #[must_use]
    pub fn new(from: Weight, to: Weight) -> Self {
        Self { from, to }
    }

    /// The range a uniform sample of the given fraction retains.
    #[must_use]
    pub fn for_fraction(fraction: f64) -> Self {
        Self::new(Weight::MIN, Weight::from_fraction(fraction))
    }

    /// Returns `true` if no weight falls inside the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to <= self.from && !self.to.is_unbounded()
    }

    /// Returns `true` if the weight falls inside the range.
    #[must_use]
    pub fn contains(&self, weight: Weight) -> bool {
        if weight < self.from {
            return false;
        }

        weight < self.to || self.to.is_unbounded()
    }

    /// Returns `true` if a block tagged `[min, max]` may contain weights
    /// inside the range.
    ///
    /// Used for file skipping: a disjoint block is never read.
    #[must_use]
    pub fn overlaps_tags(&self, min: Weight, max: Weight) -> bool {
        if self.is_empty() {
            return false;
        }

        if max < self.from {
            return false;
        }

        self.to.is_unbounded() || min < self.to
    }
}

impl std::fmt::Display for WeightRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{})", self.from, self.to)
    }
}
