// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transformers normalize raw column values into `[0,1]`.
//!
//! Each indexed column carries one transformer inside the table's revision.
//! Values outside a linear transformer's fitted range never fail - they clamp,
//! and the observed statistics flag that a wider transformer (and therefore a
//! new revision) is desirable on the next commit.

mod empty;
mod hashed;
mod linear;
mod stats;

pub use {
    empty::EmptyTransformer, hashed::HashedTransformer, linear::LinearTransformer,
    stats::ColumnStats,
};

use crate::row::{ColumnValue, DataType};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Normalizes a raw column value into `[0,1]`.
#[enum_dispatch]
pub trait Transform {
    /// Maps a raw value into `[0,1]`, clamping out-of-range values.
    fn transform(&self, value: &ColumnValue) -> f64;
}

/// Per-column normalization function
///
/// Tagged variants instead of subtype polymorphism; `supersedes` and `merge`
/// are pure functions on the variants.
#[enum_dispatch(Transform)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Transformer {
    /// Clamp-and-scale for numeric and temporal columns
    Linear(LinearTransformer),

    /// Stable hash for categorical or unbounded domains
    Hashed(HashedTransformer),

    /// Identity 0 before any data has been seen
    Empty(EmptyTransformer),
}

impl Transformer {
    /// Fits a transformer to a column from observed statistics.
    ///
    /// Ordered types get a linear transformer over the observed range;
    /// categorical types get a stable hash seeded by the column name.
    #[must_use]
    pub fn fitted(column: &str, data_type: DataType, stats: &ColumnStats) -> Self {
        if !data_type.is_ordered() {
            return Self::Hashed(HashedTransformer::for_column(column));
        }

        match stats.range() {
            Some((min, max)) => Self::Linear(LinearTransformer::new(min, max)),
            None => Self::Empty(EmptyTransformer {}),
        }
    }

    /// Returns `true` iff `other`'s domain is strictly contained in `self`'s.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Linear(a), Self::Linear(b)) => a.contains(b) && a != b,
            (Self::Linear(_) | Self::Hashed(_), Self::Empty(_)) => true,
            _ => false,
        }
    }

    /// Widens bounds / unions domains.
    ///
    /// The result supersedes both inputs (or equals the wider one).
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Linear(a), Self::Linear(b)) => Self::Linear(a.union(b)),

            (Self::Empty(_), x) => x.clone(),
            (x, Self::Empty(_)) => x.clone(),

            // A hash covers the unbounded domain already
            (Self::Hashed(h), _) | (_, Self::Hashed(h)) => Self::Hashed(h.clone()),
        }
    }

    /// Returns a widened transformer if the observed statistics exceed the
    /// fitted domain, `None` if this transformer already covers them.
    #[must_use]
    pub fn widened(&self, column: &str, data_type: DataType, stats: &ColumnStats) -> Option<Self> {
        match self {
            Self::Linear(linear) => {
                let (min, max) = stats.range()?;

                if min < linear.min() || max > linear.max() {
                    Some(Self::Linear(linear.widened(min, max)))
                } else {
                    None
                }
            }
            Self::Hashed(_) => None,
            Self::Empty(_) => {
                let fitted = Self::fitted(column, data_type, stats);

                if matches!(fitted, Self::Empty(_)) {
                    None
                } else {
                    Some(fitted)
                }
            }
        }
    }
}
