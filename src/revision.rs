// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    row::Schema,
    time::unix_timestamp_millis,
    transform::{ColumnStats, Transformer},
};
use serde::{Deserialize, Serialize};

/// Monotonically increasing revision counter; the first revision is 1
pub type RevisionId = u64;

/// Immutable snapshot of the indexing configuration.
///
/// Data files are tagged with the revision that produced them. Any
/// transformer-widening operation produces a *new* revision with a higher id;
/// the old revision's files remain queryable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    revision_id: RevisionId,
    timestamp_ms: i64,
    columns_to_index: Vec<String>,
    transformers: Vec<Transformer>,
    desired_cube_size: u64,
}

impl Revision {
    /// Fits the first revision of a table from observed batch statistics.
    ///
    /// Fails with [`crate::Error::MissingIndexedColumn`] if an indexed column
    /// is not part of the write schema.
    pub fn first(
        columns_to_index: Vec<String>,
        schema: &Schema,
        stats: &[ColumnStats],
        desired_cube_size: u64,
    ) -> crate::Result<Self> {
        debug_assert_eq!(columns_to_index.len(), stats.len());

        let mut transformers = Vec::with_capacity(columns_to_index.len());

        for (column, stats) in columns_to_index.iter().zip(stats) {
            let Some(idx) = schema.field_index(column) else {
                return Err(crate::Error::MissingIndexedColumn(column.clone()));
            };

            let data_type = schema.fields()[idx].data_type();
            transformers.push(Transformer::fitted(column, data_type, stats));
        }

        Ok(Self {
            revision_id: 1,
            timestamp_ms: unix_timestamp_millis(),
            columns_to_index,
            transformers,
            desired_cube_size,
        })
    }

    /// Returns a new revision with widened transformers if the observed
    /// statistics exceed any transformer's fitted domain.
    pub fn upgraded(&self, schema: &Schema, stats: &[ColumnStats]) -> crate::Result<Option<Self>> {
        debug_assert_eq!(self.transformers.len(), stats.len());

        let mut transformers = self.transformers.clone();
        let mut widened_any = false;

        for ((column, transformer), stats) in self
            .columns_to_index
            .iter()
            .zip(&mut transformers)
            .zip(stats)
        {
            let Some(idx) = schema.field_index(column) else {
                return Err(crate::Error::MissingIndexedColumn(column.clone()));
            };

            let data_type = schema.fields()[idx].data_type();

            if let Some(widened) = transformer.widened(column, data_type, stats) {
                debug_assert!(widened.supersedes(transformer) || *transformer == widened);
                *transformer = widened;
                widened_any = true;
            }
        }

        if !widened_any {
            return Ok(None);
        }

        Ok(Some(Self {
            revision_id: self.revision_id + 1,
            timestamp_ms: unix_timestamp_millis(),
            columns_to_index: self.columns_to_index.clone(),
            transformers,
            desired_cube_size: self.desired_cube_size,
        }))
    }

    /// The revision id.
    #[must_use]
    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    /// Creation time in unix milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// The indexed column names, in index order.
    #[must_use]
    pub fn columns_to_index(&self) -> &[String] {
        &self.columns_to_index
    }

    /// The per-column transformers, in index order.
    #[must_use]
    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }

    /// The per-cube element target.
    #[must_use]
    pub fn desired_cube_size(&self) -> u64 {
        self.desired_cube_size
    }

    /// Number of indexed dimensions.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dims(&self) -> u32 {
        self.columns_to_index.len() as u32
    }

    /// Resolves the indexed columns' positions in a write schema.
    pub fn column_positions(&self, schema: &Schema) -> crate::Result<Vec<usize>> {
        self.columns_to_index
            .iter()
            .map(|column| {
                schema
                    .field_index(column)
                    .ok_or_else(|| crate::Error::MissingIndexedColumn(column.clone()))
            })
            .collect()
    }
}
