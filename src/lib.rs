// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A multidimensional indexing and sampling engine for columnar tables.
//!
//! ##### About
//!
//! This crate augments an append-only table of immutable data files with a
//! secondary index (the *OTree*) that makes statistically uniform sampling
//! cheap: instead of reading every file to sample a fraction of the table,
//! a sample request becomes a range predicate over a per-row *weight* that
//! can be answered from per-file metadata, so entire files are skipped.
//!
//! Every row is assigned a pseudo-random 32-bit weight derived from its
//! indexed columns, and placed into a *cube* - a hyper-rectangular region of
//! the normalized `[0,1]^d` key space. Cubes form a `2^d`-ary tree; each cube
//! holds the lowest-weighted rows of its region up to a target capacity, so
//! the union of cubes up to any depth is a uniform sample of the whole table.
//!
//! Writes are committed against an external transaction log with optimistic
//! version-CAS semantics; conflicting writers rebase and retry. The index is
//! fully reconstructible from the per-file tags stored in the log - there is
//! no separate index file.
//!
//! # Example usage
//!
//! ```
//! use otree::{Config, DataType, Field, MemoryLog, Row, Schema, WriteOptions};
//! use std::sync::Arc;
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let table = Config::new(folder).open(Arc::new(MemoryLog::default()))?;
//!
//! let schema = Schema::new(vec![
//!     Field::new("x", DataType::Int64),
//!     Field::new("y", DataType::Int64),
//! ]);
//!
//! let rows = (0..1_000i64)
//!     .map(|n| Row::new(vec![n.into(), (n * 7).into()]))
//!     .collect::<Vec<_>>();
//!
//! // The first write needs to know which columns to index
//! let opts = WriteOptions::new()
//!     .columns_to_index(["x", "y"])
//!     .cube_size(100);
//! table.write(&schema, rows, &opts)?;
//!
//! assert_eq!(1_000, table.count()?);
//!
//! // A uniform 10% sample, pushed down to file skipping
//! let sample = table.sample(0.1)?.collect::<otree::Result<Vec<_>>>()?;
//! assert!(sample.len() < 1_000);
//! #
//! # Ok::<(), otree::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        }
    };
}

mod analyze;
mod block;
mod coding;
mod committer;
mod config;
mod cube;
mod error;

#[doc(hidden)]
pub mod hash;

mod indexer;
mod revision;
mod row;
mod sample;
mod staging;
mod state;
mod table;
mod time;
mod transform;
mod translog;
mod weight;
mod writer;

#[doc(hidden)]
pub use indexer::{Indexed, Indexer};

#[doc(hidden)]
pub use writer::BlockWriter;

pub use {
    analyze::AnalyzeReport,
    block::{Block, BlockTags, CubeState},
    coding::{DecodeError, EncodeError},
    config::Config,
    cube::CubeId,
    error::{Error, Result},
    revision::{Revision, RevisionId},
    row::{ColumnValue, DataType, Field, Row, Schema},
    sample::{IndexHashExpr, SamplePlan, SamplePredicate},
    state::{CubeStatus, IndexState},
    table::{Scan, Table, WriteOptions},
    transform::{ColumnStats, Transform, Transformer},
    translog::{Commit, CommitOutcome, DirectoryLog, LogRecord, LogStore, MemoryLog, Snapshot},
    weight::{Weight, WeightRange},
    writer::StopSignal,
};

/// The log version a commit produced.
pub type Version = u64;

#[doc(hidden)]
pub type HashMap<K, V> = std::collections::HashMap<K, V, rustc_hash::FxBuildHasher>;

#[doc(hidden)]
pub type HashSet<T> = std::collections::HashSet<T, rustc_hash::FxBuildHasher>;
