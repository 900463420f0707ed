// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The external transaction log, reduced to the abstract API the engine
//! needs: ordered commits of JSON-equivalent records with atomic
//! version-CAS semantics.
//!
//! Two reference implementations ship with the crate: an in-process
//! [`MemoryLog`] and a one-file-per-version [`DirectoryLog`]. The index is
//! fully reconstructible from the records - see [`Snapshot`].

mod directory;
mod memory;
mod snapshot;

pub use {directory::DirectoryLog, memory::MemoryLog, snapshot::Snapshot};

use crate::{block::Block, cube::CubeId, revision::Revision, Version};
use serde::{Deserialize, Serialize};

/// One record inside a commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LogRecord {
    /// Adds a tagged data file
    AddBlock(Block),

    /// Removes a file from the live set; the bytes stay on disk until
    /// garbage-collected externally
    RemoveBlock {
        /// File name, relative to the table folder
        path: String,
    },

    /// Installs a revision (the first one, or a transformer-widening
    /// upgrade)
    Metadata(Revision),

    /// Replaces the set of announced cubes of one revision.
    ///
    /// Advisory only; reads never consult it.
    Announce {
        /// The revision the announcement applies to
        revision_id: crate::RevisionId,

        /// The announced cubes
        cubes: Vec<CubeId>,

        /// Announcement time in unix milliseconds
        timestamp_ms: i64,
    },
}

/// An atomically committed set of records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// The log version this commit created; versions are dense and start
    /// at zero
    pub version: Version,

    /// The commit's records
    pub records: Vec<LogRecord>,
}

/// The outcome of a commit attempt.
#[derive(Debug, Eq, PartialEq)]
pub enum CommitOutcome {
    /// The version was free and the commit is durable
    Committed,

    /// Another writer took the version first; re-read and rebase
    Conflict,
}

/// Abstract version-CAS transaction log.
///
/// The engine depends only on this trait; the log's physical format is the
/// host system's concern.
pub trait LogStore: Send + Sync {
    /// The latest committed version, or `None` for an empty log.
    fn current_version(&self) -> crate::Result<Option<Version>>;

    /// All commits, in version order.
    fn commits(&self) -> crate::Result<Vec<Commit>>;

    /// Atomically commits `commit.version`, failing with
    /// [`CommitOutcome::Conflict`] if that version is already taken.
    fn try_commit(&self, commit: Commit) -> crate::Result<CommitOutcome>;
}
