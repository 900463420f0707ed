// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{LogRecord, LogStore};
use crate::{
    block::{Block, CubeState},
    cube::CubeId,
    revision::{Revision, RevisionId},
    state::IndexState,
    HashMap, HashSet, Version,
};
use std::collections::BTreeMap;

/// An immutable fold of the whole transaction log.
///
/// Readers take a snapshot at query start and never observe a partial
/// commit; writers plan against a snapshot and CAS on its version.
#[derive(Clone, Debug)]
pub struct Snapshot {
    version: Option<Version>,

    /// Live blocks by path; a `BTreeMap` keeps scan order deterministic
    blocks: BTreeMap<String, Block>,

    revisions: BTreeMap<RevisionId, Revision>,

    announced: HashMap<RevisionId, (Vec<CubeId>, i64)>,
}

impl Snapshot {
    /// Reads and folds the log.
    pub fn from_log(log: &dyn LogStore) -> crate::Result<Self> {
        let commits = log.commits()?;

        let mut version = None;
        let mut blocks = BTreeMap::new();
        let mut revisions = BTreeMap::new();
        let mut announced: HashMap<RevisionId, (Vec<CubeId>, i64)> = HashMap::default();

        for commit in commits {
            version = version.max(Some(commit.version));

            for record in commit.records {
                match record {
                    LogRecord::AddBlock(block) => {
                        blocks.insert(block.path.clone(), block);
                    }
                    LogRecord::RemoveBlock { path } => {
                        blocks.remove(&path);
                    }
                    LogRecord::Metadata(revision) => {
                        revisions.insert(revision.revision_id(), revision);
                    }
                    LogRecord::Announce {
                        revision_id,
                        cubes,
                        timestamp_ms,
                    } => {
                        announced.insert(revision_id, (cubes, timestamp_ms));
                    }
                }
            }
        }

        Ok(Self {
            version,
            blocks,
            revisions,
            announced,
        })
    }

    /// The latest committed version, `None` for an empty log.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// The version the next commit must claim.
    #[must_use]
    pub fn next_version(&self) -> Version {
        self.version.map_or(0, |v| v + 1)
    }

    /// Iterates over all live blocks, across revisions, in path order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Iterates over the live blocks of one revision.
    pub fn blocks_of_revision(&self, revision_id: RevisionId) -> impl Iterator<Item = &Block> {
        self.blocks
            .values()
            .filter(move |block| block.tags.revision_id == revision_id)
    }

    /// A committed revision by id.
    #[must_use]
    pub fn revision(&self, revision_id: RevisionId) -> Option<&Revision> {
        self.revisions.get(&revision_id)
    }

    /// The highest committed revision.
    #[must_use]
    pub fn latest_revision(&self) -> Option<&Revision> {
        self.revisions.values().next_back()
    }

    /// All committed revisions, in id order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    /// The announced cubes of a revision and when they were announced.
    #[must_use]
    pub fn announced(&self, revision_id: RevisionId) -> (HashSet<CubeId>, Option<i64>) {
        self.announced.get(&revision_id).map_or_else(
            || (HashSet::default(), None),
            |(cubes, ts)| (cubes.iter().cloned().collect(), Some(*ts)),
        )
    }

    /// Builds the in-memory index state of one revision.
    pub fn index_state(&self, revision_id: RevisionId) -> crate::Result<IndexState> {
        let revision = self
            .revision(revision_id)
            .ok_or(crate::Error::UnknownRevision(revision_id))?;

        let (announced, _) = self.announced(revision_id);

        Ok(IndexState::from_blocks(
            revision,
            self.blocks_of_revision(revision_id),
            &announced,
        ))
    }

    /// Total row count across all live, non-obsolete blocks, straight from
    /// the tags - no data file is read.
    #[must_use]
    pub fn total_elements(&self) -> u64 {
        self.blocks
            .values()
            .filter(|block| block.tags.state != CubeState::Replicated)
            .map(|block| block.tags.element_count)
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::{tests::block, Commit, MemoryLog};
    use super::*;
    use crate::row::{DataType, Field, Schema};
    use crate::transform::ColumnStats;
    use test_log::test;

    fn test_revision() -> Revision {
        let schema = Schema::new(vec![
            Field::new("x", DataType::Int64),
            Field::new("y", DataType::Int64),
        ]);

        let mut stats = ColumnStats::default();
        stats.observe(&0i64.into());
        stats.observe(&10i64.into());

        Revision::first(
            vec!["x".into(), "y".into()],
            &schema,
            &[stats.clone(), stats],
            100,
        )
        .unwrap()
    }

    #[test]
    fn snapshot_folds_adds_and_removes() -> crate::Result<()> {
        let log = MemoryLog::default();

        log.try_commit(Commit {
            version: 0,
            records: vec![
                LogRecord::Metadata(test_revision()),
                LogRecord::AddBlock(block("a.blk")),
                LogRecord::AddBlock(block("b.blk")),
            ],
        })?;

        log.try_commit(Commit {
            version: 1,
            records: vec![
                LogRecord::RemoveBlock { path: "a.blk".into() },
                LogRecord::AddBlock(block("c.blk")),
            ],
        })?;

        let snapshot = Snapshot::from_log(&log)?;

        assert_eq!(Some(1), snapshot.version());
        assert_eq!(2, snapshot.next_version());

        let paths = snapshot.blocks().map(|b| b.path.as_str()).collect::<Vec<_>>();
        assert_eq!(vec!["b.blk", "c.blk"], paths);

        assert_eq!(2, snapshot.total_elements());
        assert_eq!(1, snapshot.latest_revision().unwrap().revision_id());

        Ok(())
    }

    #[test]
    fn snapshot_empty_log() -> crate::Result<()> {
        let log = MemoryLog::default();
        let snapshot = Snapshot::from_log(&log)?;

        assert_eq!(None, snapshot.version());
        assert_eq!(0, snapshot.next_version());
        assert_eq!(None, snapshot.latest_revision());
        assert_eq!(0, snapshot.blocks().count());

        Ok(())
    }

    #[test]
    fn snapshot_announce_replaces() -> crate::Result<()> {
        let log = MemoryLog::default();
        let root = CubeId::root(2);

        log.try_commit(Commit {
            version: 0,
            records: vec![
                LogRecord::Metadata(test_revision()),
                LogRecord::Announce {
                    revision_id: 1,
                    cubes: vec![root.clone(), root.child(0)],
                    timestamp_ms: 5,
                },
            ],
        })?;

        log.try_commit(Commit {
            version: 1,
            records: vec![LogRecord::Announce {
                revision_id: 1,
                cubes: vec![root.child(0)],
                timestamp_ms: 9,
            }],
        })?;

        let snapshot = Snapshot::from_log(&log)?;
        let (announced, ts) = snapshot.announced(1);

        assert_eq!(1, announced.len());
        assert!(announced.contains(&root.child(0)));
        assert_eq!(Some(9), ts);

        Ok(())
    }

    #[test]
    fn snapshot_index_state_unknown_revision() -> crate::Result<()> {
        let log = MemoryLog::default();
        let snapshot = Snapshot::from_log(&log)?;

        assert!(matches!(
            snapshot.index_state(7),
            Err(crate::Error::UnknownRevision(7))
        ));

        Ok(())
    }
}
