// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The write pipeline: index, write blocks, commit, and retry.
//!
//! Worker threads index and write immutable input partitions against a
//! shared snapshot; a single committer then races a version-CAS against the
//! log. A lost race against an adds-only winner is rebased: the snapshot is
//! re-read, the pure indexer re-runs in memory, and only the cubes whose
//! routing actually changed are rewritten - cubes with an identical row set
//! and cutoff keep the file the previous attempt already made durable.
//! Rewrites use fresh file names, so retries stay idempotent. All
//! recoverable conditions are typed outcomes - no control flow crosses the
//! commit boundary through panics.

use crate::{
    block::Block,
    config::Config,
    cube::CubeId,
    indexer::{collect_stats, Indexed, Indexer},
    revision::{Revision, RevisionId},
    row::{Row, Schema},
    state::IndexState,
    translog::{Commit, CommitOutcome, LogRecord, LogStore, Snapshot},
    weight::Weight,
    writer::{BlockWriter, StopSignal},
    HashMap, Version,
};
use std::path::Path;

pub(crate) struct WriteRequest<'a> {
    pub schema: &'a Schema,
    pub partitions: &'a [Vec<Row>],
    pub columns_to_index: Option<&'a [String]>,
    pub cube_size: Option<u64>,
}

/// One partition's outcome, kept across commit attempts so a rebase can
/// reuse the files whose routing did not change.
pub(crate) struct PartitionWrite {
    /// Row positions per cube, in batch order
    groups: HashMap<CubeId, Vec<usize>>,

    /// The cutoffs the blocks were tagged with
    cutoffs: HashMap<CubeId, Weight>,

    /// The durable (but not yet committed) file per cube
    blocks: HashMap<CubeId, Block>,
}

/// Resolves the revision this write runs under.
///
/// Returns the revision plus whether it is new to the log (first write, or
/// a transformer-widening upgrade that the commit must install).
fn resolve_revision(
    snapshot: &Snapshot,
    config: &Config,
    request: &WriteRequest<'_>,
) -> crate::Result<(Revision, bool)> {
    match snapshot.latest_revision() {
        None => {
            let Some(columns) = request.columns_to_index else {
                return Err(crate::Error::MissingIndexedColumn(
                    "columnsToIndex is required on the first write".into(),
                ));
            };

            let positions = columns
                .iter()
                .map(|column| {
                    request
                        .schema
                        .field_index(column)
                        .ok_or_else(|| crate::Error::MissingIndexedColumn(column.clone()))
                })
                .collect::<crate::Result<Vec<_>>>()?;

            let stats = collect_stats(request.schema, &positions, request.partitions)?;

            let revision = Revision::first(
                columns.to_vec(),
                request.schema,
                &stats,
                request.cube_size.unwrap_or(config.default_cube_size),
            )?;

            log::debug!("bootstrapping revision 1 over {columns:?}");

            Ok((revision, true))
        }

        Some(current) => {
            let positions = current.column_positions(request.schema)?;
            let stats = collect_stats(request.schema, &positions, request.partitions)?;

            match current.upgraded(request.schema, &stats)? {
                Some(upgraded) => {
                    log::info!(
                        "widening transformers: revision {} -> {}",
                        current.revision_id(),
                        upgraded.revision_id(),
                    );

                    Ok((upgraded, true))
                }
                None => Ok((current.clone(), false)),
            }
        }
    }
}

/// Indexes and writes one partition, retrying the write once as a whole.
///
/// `previous` is the same partition's outcome from a lost commit attempt:
/// cubes whose row set and cutoff are unchanged under the re-read state
/// keep their already-durable file, and only the re-routed cubes are
/// written again, under fresh names.
#[allow(clippy::too_many_arguments)]
fn write_partition(
    partition: usize,
    folder: &Path,
    config: &Config,
    schema: &Schema,
    revision: &Revision,
    state: &IndexState,
    rows: &[Row],
    stop: &StopSignal,
    previous: Option<&PartitionWrite>,
) -> crate::Result<PartitionWrite> {
    if rows.is_empty() {
        return Ok(PartitionWrite {
            groups: HashMap::default(),
            cutoffs: HashMap::default(),
            blocks: HashMap::default(),
        });
    }

    let indexed = Indexer::new(revision, state, config).index(schema, rows)?;

    let mut groups: HashMap<CubeId, Vec<usize>> = HashMap::default();

    for (idx, (cube, _)) in indexed.assignments.iter().enumerate() {
        groups.entry(cube.clone()).or_default().push(idx);
    }

    let mut blocks: HashMap<CubeId, Block> = HashMap::default();

    if let Some(previous) = previous {
        for (cube, members) in &groups {
            if previous.groups.get(cube) == Some(members)
                && previous.cutoffs.get(cube) == indexed.cube_cutoffs.get(cube)
            {
                if let Some(block) = previous.blocks.get(cube) {
                    blocks.insert(cube.clone(), block.clone());
                }
            }
        }

        log::debug!(
            "partition {partition}: rebase reuses {} of {} blocks",
            blocks.len(),
            groups.len(),
        );
    }

    let mut last_io = None;

    for attempt in 0..2 {
        match write_blocks(folder, schema, revision, rows, &indexed, &blocks, stop) {
            Ok(written) => {
                for block in written {
                    blocks.insert(block.tags.cube.clone(), block);
                }

                return Ok(PartitionWrite {
                    groups,
                    cutoffs: indexed.cube_cutoffs,
                    blocks,
                });
            }
            Err(crate::Error::Io(e)) => {
                log::warn!("partition {partition} failed on attempt {attempt}: {e}");
                last_io = Some(e);
            }
            Err(other) => return Err(other),
        }
    }

    Err(crate::Error::WriterIo {
        partition,
        attempts: 2,
        source: last_io.unwrap_or_else(|| std::io::Error::other("unknown writer failure")),
    })
}

/// Streams assigned rows through a [`BlockWriter`], skipping cubes whose
/// file is already reused from an earlier attempt.
pub(crate) fn write_blocks(
    folder: &Path,
    schema: &Schema,
    revision: &Revision,
    rows: &[Row],
    indexed: &Indexed,
    reuse: &HashMap<CubeId, Block>,
    stop: &StopSignal,
) -> crate::Result<Vec<Block>> {
    let mut writer = BlockWriter::new(folder, schema, revision, stop.clone());

    for (row, (cube, weight)) in rows.iter().zip(&indexed.assignments) {
        if reuse.contains_key(cube) {
            continue;
        }

        if let Err(e) = writer.write(row, cube, *weight) {
            writer.abort();
            return Err(e);
        }
    }

    writer.finish(&indexed.cube_cutoffs)
}

#[allow(clippy::too_many_arguments)]
fn run_partitions(
    folder: &Path,
    config: &Config,
    schema: &Schema,
    revision: &Revision,
    state: &IndexState,
    partitions: &[Vec<Row>],
    stop: &StopSignal,
    previous: Option<&[PartitionWrite]>,
) -> crate::Result<Vec<PartitionWrite>> {
    if let [rows] = partitions {
        let prev = previous.and_then(<[PartitionWrite]>::first);

        return Ok(vec![write_partition(
            0, folder, config, schema, revision, state, rows, stop, prev,
        )?]);
    }

    let results = std::thread::scope(|scope| {
        let handles = partitions
            .iter()
            .enumerate()
            .map(|(idx, rows)| {
                let prev = previous.and_then(|p| p.get(idx));

                scope.spawn(move || {
                    write_partition(
                        idx, folder, config, schema, revision, state, rows, stop, prev,
                    )
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });

    let mut outcomes = Vec::with_capacity(partitions.len());

    for result in results {
        match result {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(crate::Error::Unrecoverable),
        }
    }

    Ok(outcomes)
}

/// Runs the full write pipeline against the log.
pub(crate) fn commit_write(
    log: &dyn LogStore,
    config: &Config,
    request: &WriteRequest<'_>,
    stop: &StopSignal,
) -> crate::Result<Version> {
    debug_assert!(
        request.partitions.iter().any(|rows| !rows.is_empty()),
        "empty writes are filtered out by the table facade"
    );

    let mut previous: Option<Vec<PartitionWrite>> = None;
    let mut previous_revision: Option<RevisionId> = None;

    for attempt in 0..=config.number_of_retries {
        if stop.is_cancelled() {
            return Err(crate::Error::WriteCancelled);
        }

        let snapshot = Snapshot::from_log(log)?;

        let (revision, install_revision) = resolve_revision(&snapshot, config, request)?;

        // A fresh revision starts an empty tree; the old revision's files
        // stay queryable under their own tags
        let state = if install_revision {
            IndexState::empty(&revision)
        } else {
            snapshot.index_state(revision.revision_id())?
        };

        // Files may only be reused across attempts that plan under the
        // same revision - the tags carry the revision id
        let reusable = if previous_revision == Some(revision.revision_id()) {
            previous.as_deref()
        } else {
            None
        };

        let outcomes = run_partitions(
            &config.path,
            config,
            request.schema,
            &revision,
            &state,
            request.partitions,
            stop,
            reusable,
        )?;

        let mut blocks = outcomes
            .iter()
            .flat_map(|outcome| outcome.blocks.values().cloned())
            .collect::<Vec<_>>();

        blocks.sort_by(|a, b| a.path.cmp(&b.path));

        let mut records = Vec::with_capacity(blocks.len() + 1);

        if install_revision {
            records.push(LogRecord::Metadata(revision.clone()));
        }

        records.extend(blocks.into_iter().map(LogRecord::AddBlock));

        let version = snapshot.next_version();

        match log.try_commit(Commit { version, records })? {
            CommitOutcome::Committed => {
                log::debug!("committed version {version} on attempt {attempt}");
                return Ok(version);
            }
            CommitOutcome::Conflict => {
                // An adds-only winner is rebased against directly; a winner
                // that installed a revision forces a full re-plan, which the
                // next attempt's snapshot read does anyway
                let winner_changed_revision = log.commits()?.iter().any(|commit| {
                    commit.version >= version
                        && commit
                            .records
                            .iter()
                            .any(|record| matches!(record, LogRecord::Metadata(_)))
                });

                // Files the rebase does not pick up again are never
                // referenced by a commit; the external garbage collector
                // reclaims them
                log::debug!(
                    "lost version {version}, {} (attempt {attempt})",
                    if winner_changed_revision {
                        "re-planning against the new revision"
                    } else {
                        "rebasing"
                    },
                );

                previous_revision = Some(revision.revision_id());
                previous = Some(outcomes);
            }
        }
    }

    Err(crate::Error::CommitConflict {
        attempts: config.number_of_retries + 1,
    })
}
