// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Transform;
use crate::row::ColumnValue;
use serde::{Deserialize, Serialize};

/// `2^53`, the largest power of two a f64 resolves exactly
const BUCKETS: u64 = 1 << 53;

/// Stable-hash normalization for categorical or unbounded domains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedTransformer {
    seed: u64,
}

impl HashedTransformer {
    /// Creates a hashed transformer with an explicit seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Creates a hashed transformer seeded by the column name, so the same
    /// column always hashes the same way across revisions and deployments.
    #[must_use]
    pub fn for_column(column: &str) -> Self {
        Self::new(crate::hash::hash64(column.as_bytes(), 0))
    }

    /// The transformer's seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Transform for HashedTransformer {
    #[allow(clippy::cast_precision_loss)]
    fn transform(&self, value: &ColumnValue) -> f64 {
        let mut buf = vec![];
        value.write_raw_bytes(&mut buf);

        let bucket = crate::hash::hash64(&buf, self.seed) % BUCKETS;
        bucket as f64 / BUCKETS as f64
    }
}
