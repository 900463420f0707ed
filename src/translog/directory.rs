// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Commit, CommitOutcome, LogStore};
use crate::{writer::format::fsync_directory, Version};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One-JSON-file-per-version transaction log.
///
/// Version `v` lives in `{v:020}.json`. The CAS comes from the filesystem:
/// the commit is staged in a temp file (synced before it becomes visible)
/// and moved into place with a no-clobber persist, so two writers racing
/// for the same version cannot both win, and a crash never leaves a
/// half-written version file behind.
pub struct DirectoryLog {
    folder: PathBuf,
}

impl DirectoryLog {
    /// Opens (and creates, if needed) a log folder.
    pub fn create<P: AsRef<Path>>(folder: P) -> crate::Result<Self> {
        std::fs::create_dir_all(folder.as_ref())?;

        Ok(Self {
            folder: folder.as_ref().to_path_buf(),
        })
    }

    fn version_path(&self, version: Version) -> PathBuf {
        self.folder.join(format!("{version:020}.json"))
    }

    fn parse_version(name: &str) -> Option<Version> {
        name.strip_suffix(".json")?.parse().ok()
    }
}

impl LogStore for DirectoryLog {
    fn current_version(&self) -> crate::Result<Option<Version>> {
        let mut latest = None;

        for entry in std::fs::read_dir(&self.folder)? {
            let entry = entry?;

            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(Self::parse_version)
            {
                latest = latest.max(Some(version));
            }
        }

        Ok(latest)
    }

    fn commits(&self) -> crate::Result<Vec<Commit>> {
        let Some(latest) = self.current_version()? else {
            return Ok(vec![]);
        };

        let mut commits = Vec::with_capacity(usize::try_from(latest).unwrap_or_default() + 1);

        for version in 0..=latest {
            let bytes = std::fs::read(self.version_path(version))?;
            let commit: Commit = serde_json::from_slice(&bytes)?;

            commits.push(commit);
        }

        Ok(commits)
    }

    fn try_commit(&self, commit: Commit) -> crate::Result<CommitOutcome> {
        let serialized = serde_json::to_vec_pretty(&commit)?;
        let target = self.version_path(commit.version);

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.folder)?;
        temp_file.write_all(&serialized)?;
        temp_file.flush()?;
        temp_file.as_file_mut().sync_all()?;

        match temp_file.persist_noclobber(&target) {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                log::debug!("version {} already taken", commit.version);
                return Ok(CommitOutcome::Conflict);
            }
            Err(e) => return Err(e.error.into()),
        }

        fsync_directory(&self.folder)?;

        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::tests::block;
    use super::*;
    use crate::translog::LogRecord;
    use test_log::test;

    #[test]
    fn directory_log_round_trip() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let log = DirectoryLog::create(folder.path().join("_log"))?;

        assert_eq!(None, log.current_version()?);
        assert!(log.commits()?.is_empty());

        let commit = Commit {
            version: 0,
            records: vec![LogRecord::AddBlock(block("a.blk"))],
        };

        assert_eq!(CommitOutcome::Committed, log.try_commit(commit.clone())?);
        assert_eq!(Some(0), log.current_version()?);
        assert_eq!(vec![commit], log.commits()?);

        Ok(())
    }

    #[test]
    fn directory_log_conflict() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let log = DirectoryLog::create(folder.path().join("_log"))?;

        log.try_commit(Commit {
            version: 0,
            records: vec![],
        })?;

        let outcome = log.try_commit(Commit {
            version: 0,
            records: vec![LogRecord::AddBlock(block("late.blk"))],
        })?;
        assert_eq!(CommitOutcome::Conflict, outcome);

        // the losing temp file is gone
        let names = std::fs::read_dir(folder.path().join("_log"))?
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(vec!["00000000000000000000.json".to_owned()], names);

        Ok(())
    }

    #[test]
    fn directory_log_reopen() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("_log");

        {
            let log = DirectoryLog::create(&path)?;
            log.try_commit(Commit {
                version: 0,
                records: vec![LogRecord::AddBlock(block("a.blk"))],
            })?;
            log.try_commit(Commit {
                version: 1,
                records: vec![LogRecord::RemoveBlock { path: "a.blk".into() }],
            })?;
        }

        let log = DirectoryLog::create(&path)?;
        assert_eq!(Some(1), log.current_version()?);
        assert_eq!(2, log.commits()?.len());

        Ok(())
    }
}
