// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Index maintenance: spotting degenerate cubes and rewriting them.
//!
//! `analyze` walks one revision's tree and proposes cubes whose samples are
//! under-filled or whose files fragmented, announcing them in the log.
//! `optimize` reads a proposed subtree back, re-runs the indexer on it
//! against the remaining tree, and atomically swaps the replacement blocks
//! in. Blocks under rewrite are hidden from concurrent proposals in the
//! process, taking the `Replicated` role until the commit lands.

use crate::{
    block::{Block, CubeState},
    committer::write_blocks,
    config::Config,
    cube::CubeId,
    indexer::Indexer,
    revision::RevisionId,
    row::Schema,
    time::unix_timestamp_millis,
    translog::{Commit, CommitOutcome, LogRecord, LogStore, Snapshot},
    writer::{BlockReader, StopSignal},
    HashMap, HashSet, Version,
};
use std::sync::Mutex;

/// Announcements older than this count as stale and are re-proposed
pub(crate) const STALE_ANNOUNCE_MS: i64 = 10 * 60 * 1_000;

/// The outcome of analyzing one revision.
#[derive(Clone, Debug)]
pub struct AnalyzeReport {
    /// The analyzed revision
    pub revision_id: RevisionId,

    /// Cubes proposed for optimization, shallowest first
    pub cubes: Vec<CubeId>,
}

/// Walks one revision's live blocks and proposes cubes to rewrite.
pub(crate) fn find_candidates(
    snapshot: &Snapshot,
    revision_id: RevisionId,
    config: &Config,
    hidden: &HashSet<String>,
    now_ms: i64,
) -> crate::Result<Vec<CubeId>> {
    let revision = snapshot
        .revision(revision_id)
        .ok_or(crate::Error::UnknownRevision(revision_id))?;

    let state = snapshot.index_state(revision_id)?;
    let (_, announce_ts) = snapshot.announced(revision_id);

    // Per-cube file count and byte total, skipping blocks a concurrent
    // rewrite already hides
    let mut files: HashMap<CubeId, (usize, u64)> = HashMap::default();
    let mut parents: HashSet<CubeId> = HashSet::default();

    for block in snapshot.blocks_of_revision(revision_id) {
        if block.tags.state == CubeState::Replicated || hidden.contains(&block.path) {
            continue;
        }

        let entry = files.entry(block.tags.cube.clone()).or_default();
        entry.0 += 1;
        entry.1 += block.size;

        if let Some(parent) = block.tags.cube.parent() {
            parents.insert(parent);
        }
    }

    let mut candidates = vec![];

    for (cube, status) in state.iter() {
        let Some((file_count, bytes)) = files.get(cube).copied() else {
            continue;
        };

        // Rewriting huge cubes is not worth the churn
        if bytes > config.max_compaction_file_size_in_bytes {
            continue;
        }

        let under_filled = status.element_count * 2 < revision.desired_cube_size()
            && (file_count > 1 || parents.contains(cube));

        let fragmented = file_count > 1
            && bytes / (file_count as u64) < config.min_compaction_file_size_in_bytes;

        let stale_announce = status.state == CubeState::Announced
            && announce_ts.is_some_and(|ts| now_ms - ts > STALE_ANNOUNCE_MS);

        if under_filled || fragmented || stale_announce {
            candidates.push(cube.clone());
        }
    }

    // A shallower candidate's rewrite covers its whole subtree
    candidates.sort();
    let roots = drop_covered(&candidates);

    Ok(roots)
}

/// Drops cubes that sit inside another candidate's subtree.
fn drop_covered(sorted: &[CubeId]) -> Vec<CubeId> {
    let mut roots: Vec<CubeId> = vec![];

    for cube in sorted {
        let covered = roots
            .iter()
            .any(|root| root == cube || root.is_ancestor_of(cube));

        if !covered {
            roots.push(cube.clone());
        }
    }

    roots
}

/// Rewrites the given cubes' subtrees and commits the replacements.
///
/// Returns the committed version, or the current one if there was nothing
/// to rewrite.
#[allow(clippy::too_many_lines)]
pub(crate) fn optimize(
    log: &dyn LogStore,
    config: &Config,
    revision_id: RevisionId,
    targets: &[CubeId],
    hidden: &Mutex<HashSet<String>>,
    stop: &StopSignal,
) -> crate::Result<Version> {
    let mut sorted = targets.to_vec();
    sorted.sort();
    let roots = drop_covered(&sorted);

    for attempt in 0..=config.number_of_retries {
        if stop.is_cancelled() {
            return Err(crate::Error::WriteCancelled);
        }

        let snapshot = Snapshot::from_log(log)?;

        let revision = snapshot
            .revision(revision_id)
            .ok_or(crate::Error::UnknownRevision(revision_id))?
            .clone();

        let state = snapshot.index_state(revision_id)?;

        for root in &roots {
            if !state.contains(root) {
                return Err(crate::Error::UnknownCube(root.clone()));
            }
        }

        let victims = snapshot
            .blocks_of_revision(revision_id)
            .filter(|block| block.tags.state != CubeState::Replicated)
            .filter(|block| {
                roots
                    .iter()
                    .any(|root| *root == block.tags.cube || root.is_ancestor_of(&block.tags.cube))
            })
            .cloned()
            .collect::<Vec<_>>();

        if victims.is_empty() {
            return Ok(snapshot.version().unwrap_or_default());
        }

        hide(hidden, &victims, true);
        let result = rewrite(log, config, &snapshot, &revision, &state, &roots, &victims, stop);
        hide(hidden, &victims, false);

        match result? {
            Some(version) => {
                log::debug!(
                    "optimized {} cubes of revision {revision_id} at version {version}",
                    roots.len(),
                );

                return Ok(version);
            }
            // Lost the version race; re-read and try again
            None => log::debug!("optimize lost the version race (attempt {attempt})"),
        }
    }

    Err(crate::Error::CommitConflict {
        attempts: config.number_of_retries + 1,
    })
}

#[allow(clippy::expect_used)]
fn hide(hidden: &Mutex<HashSet<String>>, victims: &[Block], on: bool) {
    let mut guard = hidden.lock().expect("lock is poisoned");

    for victim in victims {
        if on {
            guard.insert(victim.path.clone());
        } else {
            guard.remove(&victim.path);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn rewrite(
    log: &dyn LogStore,
    config: &Config,
    snapshot: &Snapshot,
    revision: &crate::Revision,
    state: &crate::IndexState,
    roots: &[CubeId],
    victims: &[Block],
    stop: &StopSignal,
) -> crate::Result<Option<Version>> {
    // Read every victim row back
    let mut schema: Option<Schema> = None;
    let mut rows = vec![];

    for victim in victims {
        let reader = BlockReader::open(&config.path.join(&victim.path))?;

        match &schema {
            None => schema = Some(reader.schema().clone()),
            Some(s) if s == reader.schema() => {}
            Some(_) => {
                return Err(crate::Error::SchemaMismatch(
                    "blocks of one subtree disagree on their schema".into(),
                ));
            }
        }

        for row in reader {
            rows.push(row?);
        }
    }

    let schema = schema.ok_or(crate::Error::Unrecoverable)?;

    // Re-index against the tree minus the subtree under rewrite
    let pruned = state.without_subtrees(roots);
    let indexed = Indexer::new(revision, &pruned, config).index(&schema, &rows)?;

    let no_reuse = HashMap::default();
    let blocks = write_blocks(&config.path, &schema, revision, &rows, &indexed, &no_reuse, stop)?;

    // The rewrite resolves the announcements it covers
    let (announced, _) = snapshot.announced(revision.revision_id());

    let mut remaining = announced
        .into_iter()
        .filter(|cube| {
            !roots
                .iter()
                .any(|root| root == cube || root.is_ancestor_of(cube))
        })
        .collect::<Vec<_>>();

    remaining.sort();

    let mut records = Vec::with_capacity(blocks.len() + victims.len() + 1);
    records.extend(blocks.into_iter().map(LogRecord::AddBlock));
    records.extend(victims.iter().map(|victim| LogRecord::RemoveBlock {
        path: victim.path.clone(),
    }));
    records.push(LogRecord::Announce {
        revision_id: revision.revision_id(),
        cubes: remaining,
        timestamp_ms: unix_timestamp_millis(),
    });

    let version = snapshot.next_version();

    match log.try_commit(Commit { version, records })? {
        CommitOutcome::Committed => Ok(Some(version)),
        CommitOutcome::Conflict => Ok(None),
    }
}
