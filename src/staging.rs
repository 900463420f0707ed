// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::row::{Row, Schema};
use crossbeam_skiplist::SkipMap;
use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire},
    Mutex,
};

/// In-memory staging area for small writes.
///
/// Small batches accumulate here, unindexed, until the staged size crosses
/// the write's `staging_size_in_bytes` threshold; the drained rows are then
/// indexed as a single batch. Rows are keyed by an arrival counter in a
/// lock-free skip map, so concurrent writers can stage without blocking
/// each other.
pub struct Staging {
    items: SkipMap<u64, Row>,
    next_seq: AtomicU64,
    approximate_size: AtomicU64,
    schema: Mutex<Option<Schema>>,
}

impl Default for Staging {
    fn default() -> Self {
        Self {
            items: SkipMap::new(),
            next_seq: AtomicU64::default(),
            approximate_size: AtomicU64::default(),
            schema: Mutex::new(None),
        }
    }
}

impl Staging {
    /// Stages a batch of rows.
    ///
    /// All staged batches must share one schema.
    #[allow(clippy::expect_used)]
    pub fn push(&self, schema: &Schema, rows: Vec<Row>) -> crate::Result<()> {
        {
            let mut guard = self.schema.lock().expect("lock is poisoned");

            match &*guard {
                None => *guard = Some(schema.clone()),
                Some(staged) if staged == schema => {}
                Some(_) => {
                    return Err(crate::Error::SchemaMismatch(
                        "staged rows have a different schema".into(),
                    ));
                }
            }
        }

        for row in rows {
            schema.check_row(&row)?;

            let size = row.approximate_size() as u64;

            self.items.insert(self.next_seq.fetch_add(1, AcqRel), row);
            self.approximate_size.fetch_add(size, AcqRel);
        }

        Ok(())
    }

    /// Approximate staged size in bytes.
    pub fn size(&self) -> u64 {
        self.approximate_size.load(Acquire)
    }

    /// Number of staged rows.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Takes all staged rows, in arrival order.
    #[allow(clippy::expect_used)]
    pub fn drain(&self) -> Option<(Schema, Vec<Row>)> {
        let schema = self.schema.lock().expect("lock is poisoned").clone()?;

        let mut rows = Vec::with_capacity(self.items.len());

        while let Some(entry) = self.items.front() {
            let row = entry.value().clone();
            entry.remove();

            self.approximate_size
                .fetch_sub(row.approximate_size() as u64, AcqRel);

            rows.push(row);
        }

        if rows.is_empty() {
            return None;
        }

        Some((schema, rows))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::row::{DataType, Field};
    use test_log::test;

    fn test_schema() -> Schema {
        Schema::new(vec![Field::new("x", DataType::Int64)])
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<Row> {
        range.map(|i| Row::new(vec![i.into()])).collect()
    }

    #[test]
    fn staging_accumulates_and_drains_in_order() {
        let staging = Staging::default();
        let schema = test_schema();

        staging.push(&schema, rows(0..10)).unwrap();
        staging.push(&schema, rows(10..20)).unwrap();

        assert_eq!(20, staging.len());
        assert!(staging.size() > 0);

        let (drained_schema, drained) = staging.drain().unwrap();
        assert_eq!(schema, drained_schema);
        assert_eq!(rows(0..20), drained);

        assert!(staging.is_empty());
        assert_eq!(0, staging.size());
        assert!(staging.drain().is_none());
    }

    #[test]
    fn staging_rejects_schema_change() {
        let staging = Staging::default();
        staging.push(&test_schema(), rows(0..5)).unwrap();

        let other = Schema::new(vec![Field::new("y", DataType::String)]);
        let result = staging.push(&other, vec![Row::new(vec!["a".into()])]);

        assert!(matches!(result, Err(crate::Error::SchemaMismatch(_))));
    }

    #[test]
    fn staging_rejects_malformed_row() {
        let staging = Staging::default();

        let result = staging.push(&test_schema(), vec![Row::new(vec!["a".into()])]);
        assert!(matches!(result, Err(crate::Error::SchemaMismatch(_))));
    }
}
