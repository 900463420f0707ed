// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Transform;
use crate::row::ColumnValue;
use serde::{Deserialize, Serialize};

/// Placeholder transformer for a column no data has been seen for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyTransformer {}

impl Transform for EmptyTransformer {
    fn transform(&self, _value: &ColumnValue) -> f64 {
        0.0
    }
}
