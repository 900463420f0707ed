// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{cube::CubeId, revision::RevisionId, weight::Weight};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a cube's data, recorded on its blocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CubeState {
    /// Normal state; an upper-weight cutoff applies once the cube filled up
    Flooded,

    /// An optimization proposal has been announced for this cube.
    ///
    /// Advisory only - never affects read correctness.
    Announced,

    /// The cube's rows are represented by descendants; the block is
    /// logically obsolete and only awaits external garbage collection
    Replicated,
}

impl From<CubeState> for u8 {
    fn from(value: CubeState) -> Self {
        match value {
            CubeState::Flooded => 0,
            CubeState::Announced => 1,
            CubeState::Replicated => 2,
        }
    }
}

impl TryFrom<u8> for CubeState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Flooded),
            1 => Ok(Self::Announced),
            2 => Ok(Self::Replicated),
            _ => Err(()),
        }
    }
}

/// Index metadata tagged onto a single data file.
///
/// The index is fully reconstructible from these tags; there is no separate
/// index file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockTags {
    /// The cube the file's rows belong to
    pub cube: CubeId,

    /// The revision that produced the file
    pub revision_id: RevisionId,

    /// Lowest weight observed among the file's rows
    pub min_weight: Weight,

    /// The cube's assignment cutoff when the file was written
    /// ([`Weight::MAX`] while the cube was still open)
    pub max_weight: Weight,

    /// Lifecycle state at write time
    pub state: CubeState,

    /// Number of rows in the file
    pub element_count: u64,
}

/// One immutable output file plus its tags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// File name, relative to the table folder
    pub path: String,

    /// File length in bytes
    pub size: u64,

    /// Filesystem modification time in unix milliseconds
    pub modified_ms: i64,

    /// Index tags
    pub tags: BlockTags,
}
