// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    analyze::{find_candidates, optimize, AnalyzeReport},
    block::{Block, CubeState},
    committer::{commit_write, WriteRequest},
    config::Config,
    cube::CubeId,
    revision::{Revision, RevisionId},
    row::{Row, Schema},
    sample::{SamplePlan, SamplePredicate},
    staging::Staging,
    time::unix_timestamp_millis,
    translog::{Commit, CommitOutcome, LogRecord, LogStore, Snapshot},
    writer::{BlockReader, StopSignal},
    HashSet, Version,
};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

/// Options recognized on a write call.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    columns_to_index: Option<Vec<String>>,
    cube_size: Option<u64>,
    staging_size_in_bytes: Option<u64>,
}

impl WriteOptions {
    /// Creates empty write options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indexed columns; required on the first write of a table.
    #[must_use]
    pub fn columns_to_index<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns_to_index = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the per-cube element target for this table.
    #[must_use]
    pub fn cube_size(mut self, n: u64) -> Self {
        self.cube_size = Some(n);
        self
    }

    /// Enables the staging area: writes accumulate unindexed until the
    /// staged bytes cross this threshold, then index as one batch.
    #[must_use]
    pub fn staging_size_in_bytes(mut self, n: u64) -> Self {
        self.staging_size_in_bytes = Some(n);
        self
    }

    /// Parses the stringly-typed option form host engines pass through:
    /// `columnsToIndex` (comma-separated), `cubeSize`,
    /// `stagingSizeInBytes`. Unrecognized keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::new();

        for (key, value) in pairs {
            match key {
                "columnsToIndex" => {
                    opts.columns_to_index = Some(
                        value
                            .split(',')
                            .map(|column| column.trim().to_owned())
                            .filter(|column| !column.is_empty())
                            .collect(),
                    );
                }
                "cubeSize" => {
                    opts.cube_size = Some(value.parse().map_err(|_| {
                        crate::Error::InvalidWriteOption(format!("cubeSize: {value:?}"))
                    })?);
                }
                "stagingSizeInBytes" => {
                    opts.staging_size_in_bytes = Some(value.parse().map_err(|_| {
                        crate::Error::InvalidWriteOption(format!(
                            "stagingSizeInBytes: {value:?}"
                        ))
                    })?);
                }
                _ => {}
            }
        }

        Ok(opts)
    }
}

struct TableInner {
    config: Config,
    log: Arc<dyn LogStore>,

    staging: Staging,

    /// Paths of blocks a rewrite currently has in flight, hidden from
    /// concurrent optimization proposals
    hidden: Mutex<HashSet<String>>,
}

/// An indexed table: the datasource adapter over a folder of immutable
/// data files plus a transaction log.
///
/// Cloning is cheap and clones share the staging area.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    pub(crate) fn open(config: Config, log: Arc<dyn LogStore>) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.path)?;

        log::debug!("opening table at {:?}", config.path);

        Ok(Self {
            inner: Arc::new(TableInner {
                config,
                log,
                staging: Staging::default(),
                hidden: Mutex::new(HashSet::default()),
            }),
        })
    }

    /// The table's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The folder the data files live in.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.inner.config.path
    }

    /// A point-in-time view of the transaction log.
    pub fn snapshot(&self) -> crate::Result<Snapshot> {
        Snapshot::from_log(self.inner.log.as_ref())
    }

    /// Writes a batch of rows.
    ///
    /// Returns the committed log version, or `None` if the rows only went
    /// to the staging area (or the batch was empty).
    pub fn write(
        &self,
        schema: &Schema,
        rows: Vec<Row>,
        opts: &WriteOptions,
    ) -> crate::Result<Option<Version>> {
        self.write_cancellable(schema, rows, opts, &StopSignal::default())
    }

    /// [`Table::write`] with an external stop signal; a cancelled write
    /// commits nothing and leaves no open files behind.
    pub fn write_cancellable(
        &self,
        schema: &Schema,
        rows: Vec<Row>,
        opts: &WriteOptions,
        stop: &StopSignal,
    ) -> crate::Result<Option<Version>> {
        if let Some(threshold) = opts.staging_size_in_bytes {
            self.inner.staging.push(schema, rows)?;

            if self.inner.staging.size() <= threshold {
                log::trace!(
                    "staged {} rows ({} bytes)",
                    self.inner.staging.len(),
                    self.inner.staging.size(),
                );

                return Ok(None);
            }

            let Some((staged_schema, staged_rows)) = self.inner.staging.drain() else {
                return Ok(None);
            };

            return self
                .commit_rows(&staged_schema, &[staged_rows], opts, stop)
                .map(Some);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.commit_rows(schema, &[rows], opts, stop).map(Some)
    }

    /// Writes pre-partitioned input; partitions index and write on worker
    /// threads, then commit as one atomic transaction.
    pub fn write_partitioned(
        &self,
        schema: &Schema,
        partitions: Vec<Vec<Row>>,
        opts: &WriteOptions,
    ) -> crate::Result<Option<Version>> {
        if partitions.iter().all(Vec::is_empty) {
            return Ok(None);
        }

        self.commit_rows(schema, &partitions, opts, &StopSignal::default())
            .map(Some)
    }

    /// Indexes and commits whatever sits in the staging area.
    pub fn flush_staging(&self, opts: &WriteOptions) -> crate::Result<Option<Version>> {
        let Some((schema, rows)) = self.inner.staging.drain() else {
            return Ok(None);
        };

        self.commit_rows(&schema, &[rows], opts, &StopSignal::default())
            .map(Some)
    }

    fn commit_rows(
        &self,
        schema: &Schema,
        partitions: &[Vec<Row>],
        opts: &WriteOptions,
        stop: &StopSignal,
    ) -> crate::Result<Version> {
        let request = WriteRequest {
            schema,
            partitions,
            columns_to_index: opts.columns_to_index.as_deref(),
            cube_size: opts.cube_size,
        };

        commit_write(self.inner.log.as_ref(), &self.inner.config, &request, stop)
    }

    /// Total row count, straight from the block tags - reads no data file.
    ///
    /// Staged-but-unflushed rows are not counted.
    pub fn count(&self) -> crate::Result<u64> {
        Ok(self.snapshot()?.total_elements())
    }

    /// The highest committed revision.
    pub fn latest_revision(&self) -> crate::Result<Option<Revision>> {
        Ok(self.snapshot()?.latest_revision().cloned())
    }

    /// Scans every live row, across all revisions.
    pub fn scan(&self) -> crate::Result<Scan> {
        let files = self.live_files(&self.snapshot()?);

        Ok(Scan {
            folder: self.inner.config.path.clone(),
            files: files.into_iter(),
            predicate: None,
            current: None,
        })
    }

    /// Plans a uniform sample: rewrites the fraction into a weight-range
    /// predicate and prunes files through their tags.
    pub fn plan_sample(&self, fraction: f64) -> crate::Result<SamplePlan> {
        let snapshot = self.snapshot()?;

        let revision_id = snapshot
            .latest_revision()
            .map_or(0, Revision::revision_id);

        let columns = snapshot
            .latest_revision()
            .map(|revision| revision.columns_to_index().to_vec())
            .unwrap_or_default();

        let predicate = SamplePredicate::for_fraction(
            fraction,
            self.inner.config.index_hash_seed,
            columns,
        );

        let live = self.live_files(&snapshot);
        let total_files = live.len();

        let files = live
            .into_iter()
            .filter(|block| !predicate.prunes_file(&block.tags))
            .collect::<Vec<_>>();

        let skipped = total_files - files.len();

        log::debug!(
            "sample fraction {fraction}: reading {} of {total_files} files",
            files.len(),
        );

        Ok(SamplePlan {
            revision_id,
            predicate,
            files,
            skipped,
            total_files,
        })
    }

    /// Executes a previously built sample plan.
    ///
    /// Fails with [`crate::Error::RevisionMismatch`] if a new revision was
    /// installed since planning - the caller must reload and re-plan.
    pub fn execute_sample(&self, plan: SamplePlan) -> crate::Result<Scan> {
        let current = self
            .latest_revision()?
            .map_or(0, |revision| revision.revision_id());

        if current != plan.revision_id {
            return Err(crate::Error::RevisionMismatch {
                expected: plan.revision_id,
                found: current,
            });
        }

        Ok(Scan {
            folder: self.inner.config.path.clone(),
            files: plan.files.into_iter(),
            predicate: Some(plan.predicate),
            current: None,
        })
    }

    /// Reads a statistically uniform sample of the given fraction.
    ///
    /// Files disjoint from the weight range are skipped unread; the
    /// residual filter drops the overshoot row by row.
    pub fn sample(&self, fraction: f64) -> crate::Result<Scan> {
        self.execute_sample(self.plan_sample(fraction)?)
    }

    fn live_files(&self, snapshot: &Snapshot) -> Vec<Block> {
        snapshot
            .blocks()
            .filter(|block| block.tags.state != CubeState::Replicated)
            .cloned()
            .collect()
    }

    /// Proposes cubes of one revision for optimization and announces them
    /// in the log.
    ///
    /// The announcement is advisory; it never affects reads.
    #[allow(clippy::expect_used)]
    pub fn analyze(&self, revision_id: RevisionId) -> crate::Result<AnalyzeReport> {
        let now_ms = unix_timestamp_millis();

        let mut report = AnalyzeReport {
            revision_id,
            cubes: vec![],
        };

        for _ in 0..=self.inner.config.number_of_retries {
            let snapshot = self.snapshot()?;

            let hidden = self.inner.hidden.lock().expect("lock is poisoned").clone();

            let candidates =
                find_candidates(&snapshot, revision_id, &self.inner.config, &hidden, now_ms)?;

            report.cubes = candidates.clone();

            if candidates.is_empty() {
                return Ok(report);
            }

            let (existing, _) = snapshot.announced(revision_id);

            let mut cubes = existing.into_iter().collect::<Vec<_>>();

            for cube in candidates {
                if !cubes.contains(&cube) {
                    cubes.push(cube);
                }
            }

            cubes.sort();

            let commit = Commit {
                version: snapshot.next_version(),
                records: vec![LogRecord::Announce {
                    revision_id,
                    cubes,
                    timestamp_ms: now_ms,
                }],
            };

            match self.inner.log.try_commit(commit)? {
                CommitOutcome::Committed => return Ok(report),
                CommitOutcome::Conflict => {}
            }
        }

        // The announcement is advisory, so losing every version race
        // still leaves a usable report
        log::warn!("analyze could not announce its proposal");

        Ok(report)
    }

    /// Rewrites the given cubes' subtrees, consolidating their rows closer
    /// to the revision's cube size, and commits the swap atomically.
    pub fn optimize(&self, revision_id: RevisionId, cubes: &[CubeId]) -> crate::Result<Version> {
        optimize(
            self.inner.log.as_ref(),
            &self.inner.config,
            revision_id,
            cubes,
            &self.inner.hidden,
            &StopSignal::default(),
        )
    }
}

/// Streaming row reader over a set of planned files.
///
/// With a sample predicate attached, rows outside the weight range are
/// filtered out as they stream by.
pub struct Scan {
    folder: PathBuf,
    files: std::vec::IntoIter<Block>,
    predicate: Option<SamplePredicate>,
    current: Option<(BlockReader, Option<Vec<usize>>)>,
}

impl Iterator for Scan {
    type Item = crate::Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((reader, positions)) = &mut self.current {
                match reader.next() {
                    Some(Ok(row)) => {
                        if let (Some(predicate), Some(positions)) = (&self.predicate, &positions) {
                            let weight = crate::hash::row_weight(
                                &row,
                                positions,
                                predicate.expr().seed(),
                            );

                            if !predicate.range().contains(weight) {
                                continue;
                            }
                        }

                        return Some(Ok(row));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.current = None,
                }
            } else {
                let block = self.files.next()?;

                let reader = fail_iter!(BlockReader::open(&self.folder.join(&block.path)));

                let positions = match &self.predicate {
                    Some(predicate) => {
                        Some(fail_iter!(predicate.expr().bind(reader.schema())))
                    }
                    None => None,
                };

                self.current = Some((reader, positions));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn write_options_from_pairs() -> crate::Result<()> {
        let opts = WriteOptions::from_pairs([
            ("columnsToIndex", "a, b,c"),
            ("cubeSize", "1000"),
            ("stagingSizeInBytes", "4096"),
            ("somethingElse", "ignored"),
        ])?;

        assert_eq!(
            Some(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]),
            opts.columns_to_index,
        );
        assert_eq!(Some(1_000), opts.cube_size);
        assert_eq!(Some(4_096), opts.staging_size_in_bytes);

        Ok(())
    }

    #[test]
    fn write_options_rejects_garbage_numbers() {
        assert!(WriteOptions::from_pairs([("cubeSize", "lots")]).is_err());
    }
}
