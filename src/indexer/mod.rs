// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The core placement algorithm.
//!
//! Every row gets a point in `[0,1]^d` (via the revision's transformers) and
//! a pseudo-random weight. Starting at the root, the row descends until it
//! reaches the first cube that admits its weight; cubes that fill up past the
//! revision's capacity keep their k smallest rows by `(weight, batch
//! position)` - so equal weights at the boundary resolve by position - and
//! spill the rest one level down. The result is that the rows below any
//! weight threshold form a uniform sample of the batch.
//!
//! The indexer is pure: it reads an immutable snapshot and produces an
//! assignment, so worker threads can index partitions independently.

mod weights;

use crate::{
    config::Config,
    cube::{CubeId, MAX_DEPTH},
    revision::Revision,
    row::{Row, Schema},
    state::IndexState,
    transform::{ColumnStats, Transform},
    weight::Weight,
    HashMap, HashSet,
};
use weights::WeightBuffer;

/// The outcome of indexing one batch.
pub struct Indexed {
    /// Per row: the cube it lands in and its weight, parallel to the batch
    pub assignments: Vec<(CubeId, Weight)>,

    /// Per written cube: the assignment cutoff to tag blocks with
    /// ([`Weight::MAX`] while the cube stays open)
    pub cube_cutoffs: HashMap<CubeId, Weight>,

    /// Observed statistics per indexed column
    pub stats: Vec<ColumnStats>,
}

/// Assigns batch rows to cubes, honoring the capacity recorded in the
/// index-state snapshot.
pub struct Indexer<'a> {
    revision: &'a Revision,
    state: &'a IndexState,
    config: &'a Config,
}

impl<'a> Indexer<'a> {
    /// Creates an indexer over one revision and state snapshot.
    #[must_use]
    pub fn new(revision: &'a Revision, state: &'a IndexState, config: &'a Config) -> Self {
        debug_assert_eq!(revision.revision_id(), state.revision_id());

        Self {
            revision,
            state,
            config,
        }
    }

    /// Walks a row down the tree until a cube admits its weight.
    ///
    /// A cube missing from the snapshot becomes a new leaf and admits
    /// everything.
    fn route(&self, point: &[f64], weight: Weight, start: CubeId) -> CubeId {
        let mut cube = start;

        loop {
            match self.state.get(&cube) {
                None => return cube,
                Some(status) if status.admits(weight) => return cube,
                Some(_) => {
                    if cube.depth() >= MAX_DEPTH {
                        return cube;
                    }

                    cube = cube.child_containing(point);
                }
            }
        }
    }

    fn settle(
        cube: &CubeId,
        rows: &[usize],
        weights: &[Weight],
        assignments: &mut [Option<(CubeId, Weight)>],
    ) {
        for idx in rows {
            if let (Some(slot), Some(weight)) = (assignments.get_mut(*idx), weights.get(*idx)) {
                *slot = Some((cube.clone(), *weight));
            }
        }
    }

    /// Indexes a batch of rows.
    ///
    /// Fails the whole batch on the first malformed row; per-row errors are
    /// not supported.
    pub fn index(&self, schema: &Schema, rows: &[Row]) -> crate::Result<Indexed> {
        let positions = self.revision.column_positions(schema)?;
        let dims = self.revision.dims();
        let capacity = self.revision.desired_cube_size();

        let mut stats = vec![ColumnStats::default(); positions.len()];
        let mut points = Vec::with_capacity(rows.len());
        let mut weights = Vec::with_capacity(rows.len());

        for row in rows {
            schema.check_row(row)?;

            let mut point = Vec::with_capacity(positions.len());

            for ((pos, transformer), stats) in positions
                .iter()
                .zip(self.revision.transformers())
                .zip(&mut stats)
            {
                let value = row.get(*pos).ok_or(crate::Error::Unrecoverable)?;

                stats.observe(value);
                point.push(transformer.transform(value));
            }

            points.push(point);
            weights.push(crate::hash::row_weight(
                row,
                &positions,
                self.config.index_hash_seed,
            ));
        }

        // Rows queue up at the first cube that admits them; cubes are then
        // resolved level by level, so spilled rows always move strictly
        // deeper and every cube is visited at most once.
        let mut queues: HashMap<CubeId, Vec<usize>> = HashMap::default();
        let root = CubeId::root(dims);

        for idx in 0..rows.len() {
            let target = self.route(&points[idx], weights[idx], root.clone());
            queues.entry(target).or_default().push(idx);
        }

        let mut assignments: Vec<Option<(CubeId, Weight)>> = vec![None; rows.len()];
        let mut cube_cutoffs: HashMap<CubeId, Weight> = HashMap::default();

        let mut depth = 0;

        while !queues.is_empty() {
            debug_assert!(depth <= MAX_DEPTH + 1, "queued rows below the depth limit");

            let mut level = queues
                .keys()
                .filter(|cube| cube.depth() == depth)
                .cloned()
                .collect::<Vec<_>>();

            // Deterministic processing order
            level.sort();

            for cube in level {
                let Some(queued) = queues.remove(&cube) else {
                    continue;
                };

                let status = self.state.get(&cube);
                let snapshot_cutoff = status.map_or(Weight::MAX, |s| s.max_weight);
                let existing = status.map_or(0, |s| s.element_count);

                // A cube that flooded in an earlier commit keeps its cutoff;
                // the routing already admitted these rows against it
                if !snapshot_cutoff.is_unbounded() {
                    Self::settle(&cube, &queued, &weights, &mut assignments);
                    cube_cutoffs.insert(cube, snapshot_cutoff);
                    continue;
                }

                let projected = existing + queued.len() as u64;

                if projected <= capacity || cube.depth() >= MAX_DEPTH {
                    Self::settle(&cube, &queued, &weights, &mut assignments);
                    cube_cutoffs.insert(cube, Weight::MAX);
                    continue;
                }

                // Keep the k smallest rows by (weight, batch position), k
                // being the capacity left in the cube, and record the k-th
                // smallest weight as the cutoff
                let remaining = usize::try_from(capacity.saturating_sub(existing))
                    .unwrap_or(usize::MAX);

                #[allow(clippy::cast_precision_loss)]
                let (cutoff, keep) = if remaining == 0 {
                    // The cube reached capacity while still open. Its stored
                    // weights are uniform over the full cycle, so the cutoff
                    // its population would have at the target size is the
                    // capacity quantile
                    let cutoff = Weight::from_fraction(capacity as f64 / projected as f64);
                    (cutoff, None)
                } else {
                    let mut buffer =
                        WeightBuffer::new(remaining, self.config.cube_weights_buffer_capacity);

                    for idx in &queued {
                        buffer.push(weights[*idx], *idx);
                    }

                    let cut = buffer.cut();
                    (cut.cutoff, cut.keep)
                };

                // The keeper set, not a plain value comparison, decides the
                // boundary: rows sharing the cutoff weight stay or spill by
                // batch position
                let (kept, spilled): (Vec<usize>, Vec<usize>) = match keep {
                    Some(keep) => {
                        let keep = keep.into_iter().collect::<HashSet<_>>();

                        queued.iter().copied().partition(|idx| keep.contains(idx))
                    }
                    None => queued
                        .iter()
                        .copied()
                        .partition(|idx| weights[*idx] < cutoff),
                };

                // A value split in estimate mode can strand a mass of equal
                // weights: the cube keeps everything and stays open,
                // otherwise the rows would chase each other down the tree
                // forever
                if kept.is_empty() && existing == 0 {
                    log::warn!(
                        "cube {cube} overflows with indistinguishable weights, keeping {} rows",
                        queued.len()
                    );

                    Self::settle(&cube, &queued, &weights, &mut assignments);
                    cube_cutoffs.insert(cube, Weight::MAX);
                    continue;
                }

                Self::settle(&cube, &kept, &weights, &mut assignments);
                cube_cutoffs.insert(cube.clone(), cutoff);

                log::trace!(
                    "cube {cube} floods at {cutoff}: keeping {}, spilling {}",
                    kept.len(),
                    spilled.len()
                );

                for idx in spilled {
                    let child = cube.child_containing(&points[idx]);
                    let target = self.route(&points[idx], weights[idx], child);
                    queues.entry(target).or_default().push(idx);
                }
            }

            depth += 1;
        }

        let mut resolved = Vec::with_capacity(rows.len());

        for slot in assignments {
            resolved.push(slot.ok_or(crate::Error::Unrecoverable)?);
        }

        Ok(Indexed {
            assignments: resolved,
            cube_cutoffs,
            stats,
        })
    }
}

/// Gathers per-column statistics ahead of indexing, used to fit the first
/// revision and to detect that a transformer must be widened.
pub(crate) fn collect_stats(
    schema: &Schema,
    positions: &[usize],
    partitions: &[Vec<Row>],
) -> crate::Result<Vec<ColumnStats>> {
    let mut stats = vec![ColumnStats::default(); positions.len()];

    for rows in partitions {
        for row in rows {
            schema.check_row(row)?;

            for (pos, stats) in positions.iter().zip(&mut stats) {
                if let Some(value) = row.get(*pos) {
                    stats.observe(value);
                }
            }
        }
    }

    Ok(stats)
}
