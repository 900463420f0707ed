// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{table::Table, translog::LogStore};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Default per-cube element target
const DEFAULT_CUBE_SIZE: u64 = 5_000_000;

/// Table configuration builder
///
/// Process-scope knobs only; everything that affects row placement is
/// captured into a [`crate::Revision`] at commit time, and the revision is
/// the source of truth afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    /// Folder the data files live in
    #[doc(hidden)]
    pub path: PathBuf,

    /// Per-cube element target used when a write does not override it
    pub default_cube_size: u64,

    /// Cap on buffered weights per cube while estimating cutoffs
    pub cube_weights_buffer_capacity: usize,

    /// How often a conflicting commit is rebased and retried
    pub number_of_retries: usize,

    /// Blocks smaller than this make their cube an optimization candidate
    pub min_compaction_file_size_in_bytes: u64,

    /// Cubes holding more bytes than this are never rewritten
    pub max_compaction_file_size_in_bytes: u64,

    /// Seed of the weight hash.
    ///
    /// Fixed per deployment, not per table, so sample predicates and writer
    /// decisions always agree.
    pub index_hash_seed: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".otree.data"),
            default_cube_size: DEFAULT_CUBE_SIZE,
            cube_weights_buffer_capacity: 100_000,
            number_of_retries: 2,
            min_compaction_file_size_in_bytes: /* 256 MiB */ 256 * 1_024 * 1_024,
            max_compaction_file_size_in_bytes: /* 1 GiB */ 1_024 * 1_024 * 1_024,
            index_hash_seed: 42,
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Sets the default per-cube element target.
    ///
    /// Default = 5,000,000
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn default_cube_size(mut self, n: u64) -> Self {
        assert!(n > 0, "cube size may not be zero");

        self.default_cube_size = n;
        self
    }

    /// Sets the cap on buffered weights per cube.
    ///
    /// Default = 100,000
    #[must_use]
    pub fn cube_weights_buffer_capacity(mut self, n: usize) -> Self {
        self.cube_weights_buffer_capacity = n.max(1);
        self
    }

    /// Sets how often a conflicting commit is retried.
    ///
    /// Default = 2
    #[must_use]
    pub fn number_of_retries(mut self, n: usize) -> Self {
        self.number_of_retries = n;
        self
    }

    /// Sets the file-size window the optimizer targets.
    #[must_use]
    pub fn compaction_file_sizes(mut self, min_bytes: u64, max_bytes: u64) -> Self {
        assert!(min_bytes <= max_bytes, "invalid compaction size window");

        self.min_compaction_file_size_in_bytes = min_bytes;
        self.max_compaction_file_size_in_bytes = max_bytes;
        self
    }

    /// Sets the weight hash seed.
    ///
    /// Default = 42
    #[must_use]
    pub fn index_hash_seed(mut self, seed: u32) -> Self {
        self.index_hash_seed = seed;
        self
    }

    /// Opens the table over the given transaction log.
    pub fn open(self, log: Arc<dyn LogStore>) -> crate::Result<Table> {
        Table::open(self, log)
    }
}
