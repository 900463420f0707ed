// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The sample-to-filter rewrite.
//!
//! A request for a uniform fraction `f` of the table becomes a pure range
//! predicate `index_hash(indexed columns) in [MIN, MIN + f * 2^32)`. The
//! same predicate prunes whole files through their weight tags and filters
//! the overshoot row-by-row, so the inclusion probability per row is
//! exactly `f`. Composition with user filters is plain conjunction.

use crate::{
    block::{Block, BlockTags},
    row::{Row, Schema},
    weight::{Weight, WeightRange},
};

/// The scalar expression form of the weight hash, evaluatable by a host
/// engine's filter evaluator.
///
/// Agrees bit-for-bit with the weights the writer assigned.
#[derive(Clone, Debug)]
pub struct IndexHashExpr {
    columns: Vec<String>,
    seed: u32,
}

impl IndexHashExpr {
    /// Creates the expression over the given columns and deployment seed.
    #[must_use]
    pub fn new(columns: Vec<String>, seed: u32) -> Self {
        Self { columns, seed }
    }

    /// The hashed columns, in index order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The deployment seed.
    #[must_use]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Resolves the hashed columns' positions in a concrete file schema.
    pub fn bind(&self, schema: &Schema) -> crate::Result<Vec<usize>> {
        self.columns
            .iter()
            .map(|column| {
                schema
                    .field_index(column)
                    .ok_or_else(|| crate::Error::MissingIndexedColumn(column.clone()))
            })
            .collect()
    }

    /// Evaluates the expression for one row.
    pub fn eval(&self, schema: &Schema, row: &Row) -> crate::Result<Weight> {
        let positions = self.bind(schema)?;
        Ok(crate::hash::row_weight(row, &positions, self.seed))
    }
}

/// A rewritten uniform-sample operator: a weight range plus the expression
/// that recomputes each row's weight.
#[derive(Clone, Debug)]
pub struct SamplePredicate {
    fraction: f64,
    range: WeightRange,
    expr: IndexHashExpr,
}

impl SamplePredicate {
    /// Rewrites "uniform sample, fraction `f`, without replacement".
    #[must_use]
    pub fn for_fraction(fraction: f64, seed: u32, columns: Vec<String>) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            range: WeightRange::for_fraction(fraction),
            expr: IndexHashExpr::new(columns, seed),
        }
    }

    /// The requested fraction.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// The retained weight range.
    #[must_use]
    pub fn range(&self) -> WeightRange {
        self.range
    }

    /// The residual scalar expression.
    #[must_use]
    pub fn expr(&self) -> &IndexHashExpr {
        &self.expr
    }

    /// Returns `true` if the file's weight tags are disjoint from the
    /// sample range, so the scan must drop the file unread.
    #[must_use]
    pub fn prunes_file(&self, tags: &BlockTags) -> bool {
        !self
            .range
            .overlaps_tags(tags.min_weight, tags.max_weight)
    }

    /// The residual filter: recompute the row's weight and keep it only if
    /// it falls inside the range.
    pub fn keeps_row(&self, schema: &Schema, row: &Row) -> crate::Result<bool> {
        Ok(self.range.contains(self.expr.eval(schema, row)?))
    }
}

/// A planned sample read: which files survive pruning.
#[derive(Debug)]
pub struct SamplePlan {
    /// The latest revision the plan was built against (0 for an empty
    /// table); executing a stale plan fails with
    /// [`crate::Error::RevisionMismatch`]
    pub revision_id: crate::RevisionId,

    /// The rewritten predicate
    pub predicate: SamplePredicate,

    /// Files the scan will read
    pub files: Vec<Block>,

    /// Files dropped through their tags alone
    pub skipped: usize,

    /// Live files before pruning
    pub total_files: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::block::CubeState;
    use crate::cube::CubeId;
    use crate::row::{DataType, Field};
    use test_log::test;

    fn tags(min: Weight, max: Weight) -> BlockTags {
        BlockTags {
            cube: CubeId::root(1),
            revision_id: 1,
            min_weight: min,
            max_weight: max,
            state: CubeState::Flooded,
            element_count: 10,
        }
    }

    #[test]
    fn sample_zero_prunes_everything() {
        let predicate = SamplePredicate::for_fraction(0.0, 42, vec!["x".into()]);

        assert!(predicate.prunes_file(&tags(Weight::MIN, Weight::MAX)));
        assert!(predicate.prunes_file(&tags(Weight(-10), Weight(10))));
    }

    #[test]
    fn sample_one_prunes_nothing() {
        let predicate = SamplePredicate::for_fraction(1.0, 42, vec!["x".into()]);

        assert!(!predicate.prunes_file(&tags(Weight::MIN, Weight::MAX)));
        assert!(!predicate.prunes_file(&tags(Weight(0), Weight::MAX)));
    }

    #[test]
    fn sample_half_prunes_upper_files() {
        let predicate = SamplePredicate::for_fraction(0.5, 42, vec!["x".into()]);

        // entirely above the cutoff
        assert!(predicate.prunes_file(&tags(Weight(0), Weight::MAX)));

        // straddles the cutoff
        assert!(!predicate.prunes_file(&tags(Weight(-10), Weight(10))));

        // entirely below
        assert!(!predicate.prunes_file(&tags(Weight::MIN, Weight(-10))));
    }

    #[test]
    fn sample_expr_matches_writer_weights() -> crate::Result<()> {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::String),
        ]);

        let expr = IndexHashExpr::new(vec!["a".into(), "b".into()], 42);
        let positions = expr.bind(&schema)?;
        assert_eq!(vec![0, 1], positions);

        let row = Row::new(vec![17i64.into(), "value".into()]);

        assert_eq!(
            crate::hash::row_weight(&row, &positions, 42),
            expr.eval(&schema, &row)?
        );

        Ok(())
    }

    #[test]
    fn sample_inclusion_probability_tracks_fraction() -> crate::Result<()> {
        let schema = Schema::new(vec![Field::new("a", DataType::Int64)]);
        let predicate = SamplePredicate::for_fraction(0.25, 42, vec!["a".into()]);

        let kept = (0..10_000i64)
            .filter(|i| {
                let row = Row::new(vec![(*i).into()]);
                predicate.keeps_row(&schema, &row).unwrap_or(false)
            })
            .count();

        // expected 2500, allow generous noise
        assert!((2_000..3_000).contains(&kept), "kept {kept} of 10000");

        Ok(())
    }

    #[test]
    fn sample_column_missing_from_schema() {
        let schema = Schema::new(vec![Field::new("a", DataType::Int64)]);
        let expr = IndexHashExpr::new(vec!["missing".into()], 42);

        assert!(matches!(
            expr.bind(&schema),
            Err(crate::Error::MissingIndexedColumn(_))
        ));
    }
}
