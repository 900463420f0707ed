// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Commit, CommitOutcome, LogStore};
use crate::Version;
use std::sync::Mutex;

/// In-process transaction log.
///
/// Commits live in a mutex-guarded vector; the CAS is the check that the
/// committed version equals the vector length. Useful for embedding and
/// tests, and as the reference semantics the other implementations follow.
#[derive(Debug, Default)]
pub struct MemoryLog {
    commits: Mutex<Vec<Commit>>,
}

impl LogStore for MemoryLog {
    #[allow(clippy::expect_used)]
    fn current_version(&self) -> crate::Result<Option<Version>> {
        let commits = self.commits.lock().expect("lock is poisoned");
        Ok((commits.len() as u64).checked_sub(1))
    }

    #[allow(clippy::expect_used)]
    fn commits(&self) -> crate::Result<Vec<Commit>> {
        Ok(self.commits.lock().expect("lock is poisoned").clone())
    }

    #[allow(clippy::expect_used)]
    fn try_commit(&self, commit: Commit) -> crate::Result<CommitOutcome> {
        let mut commits = self.commits.lock().expect("lock is poisoned");

        if commit.version != commits.len() as u64 {
            return Ok(CommitOutcome::Conflict);
        }

        commits.push(commit);
        Ok(CommitOutcome::Committed)
    }
}
