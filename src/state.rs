// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    block::{Block, CubeState},
    cube::CubeId,
    revision::{Revision, RevisionId},
    weight::Weight,
    HashMap, HashSet,
};

/// Reduced per-cube status, derived from block tags.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CubeStatus {
    /// Assignment cutoff; [`Weight::MAX`] while the cube is still open
    pub max_weight: Weight,

    /// Total rows across the cube's live blocks
    pub element_count: u64,

    /// Lifecycle state
    pub state: CubeState,
}

impl CubeStatus {
    /// Returns `true` if the cube still accepts any weight.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.max_weight.is_unbounded()
    }

    /// Returns `true` if the cube admits the given weight.
    #[must_use]
    pub fn admits(&self, weight: Weight) -> bool {
        self.is_open() || weight < self.max_weight
    }
}

/// In-memory snapshot of one revision's tree, reduced from the live,
/// non-obsolete blocks of that revision.
///
/// Parent/child links are computed from the cube ids' bit-strings, never
/// stored as references, so snapshots are plain immutable maps. Workers
/// clone the snapshot; it is never shared mutably.
#[derive(Clone, Debug)]
pub struct IndexState {
    revision_id: RevisionId,
    dims: u32,
    cubes: HashMap<CubeId, CubeStatus>,
}

impl IndexState {
    /// An empty tree for a fresh revision.
    #[must_use]
    pub fn empty(revision: &Revision) -> Self {
        Self {
            revision_id: revision.revision_id(),
            dims: revision.dims(),
            cubes: HashMap::default(),
        }
    }

    /// Reduces block tags into per-cube status.
    ///
    /// `max_weight` folds with `min` - the most restrictive cutoff wins -
    /// element counts sum up, and `Replicated` blocks are skipped entirely.
    /// Announced cubes are overlaid from the latest announce record.
    pub fn from_blocks<'a>(
        revision: &Revision,
        blocks: impl IntoIterator<Item = &'a Block>,
        announced: &HashSet<CubeId>,
    ) -> Self {
        let mut cubes: HashMap<CubeId, CubeStatus> = HashMap::default();

        for block in blocks {
            if block.tags.revision_id != revision.revision_id() {
                continue;
            }

            if block.tags.state == CubeState::Replicated {
                continue;
            }

            cubes
                .entry(block.tags.cube.clone())
                .and_modify(|status| {
                    status.max_weight = status.max_weight.min(block.tags.max_weight);
                    status.element_count += block.tags.element_count;
                })
                .or_insert_with(|| CubeStatus {
                    max_weight: block.tags.max_weight,
                    element_count: block.tags.element_count,
                    state: CubeState::Flooded,
                });
        }

        for cube in announced {
            if let Some(status) = cubes.get_mut(cube) {
                status.state = CubeState::Announced;
            }
        }

        Self {
            revision_id: revision.revision_id(),
            dims: revision.dims(),
            cubes,
        }
    }

    /// The revision this snapshot belongs to.
    #[must_use]
    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    /// Number of indexed dimensions.
    #[must_use]
    pub fn dims(&self) -> u32 {
        self.dims
    }

    /// Status of a cube, if it exists in this snapshot.
    #[must_use]
    pub fn get(&self, cube: &CubeId) -> Option<&CubeStatus> {
        self.cubes.get(cube)
    }

    /// Returns `true` if the cube exists in this snapshot.
    #[must_use]
    pub fn contains(&self, cube: &CubeId) -> bool {
        self.cubes.contains_key(cube)
    }

    /// Number of cubes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Returns `true` if the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    /// Iterates over all cubes and their status.
    pub fn iter(&self) -> impl Iterator<Item = (&CubeId, &CubeStatus)> {
        self.cubes.iter()
    }

    /// Returns a copy of this snapshot with the given cubes' subtrees
    /// removed, used when re-indexing a subtree during optimization.
    #[must_use]
    pub fn without_subtrees(&self, targets: &[CubeId]) -> Self {
        let cubes = self
            .cubes
            .iter()
            .filter(|(cube, _)| {
                !targets
                    .iter()
                    .any(|target| target == *cube || target.is_ancestor_of(cube))
            })
            .map(|(cube, status)| (cube.clone(), status.clone()))
            .collect();

        Self {
            revision_id: self.revision_id,
            dims: self.dims,
            cubes,
        }
    }

    /// Checks the structural invariants of the tree.
    ///
    /// - every non-root cube's parent exists (tree connectedness)
    /// - `max_weight(parent) <= max_weight(child)`
    #[doc(hidden)]
    pub fn check_invariants(&self) -> Result<(), String> {
        for (cube, status) in &self.cubes {
            let Some(parent) = cube.parent() else {
                continue;
            };

            let Some(parent_status) = self.cubes.get(&parent) else {
                return Err(format!("cube {cube} exists but its parent does not"));
            };

            // An open parent records no cutoff; its children hold capacity
            // overflow, so only recorded cutoffs compare
            if !parent_status.max_weight.is_unbounded()
                && parent_status.max_weight > status.max_weight
            {
                return Err(format!(
                    "cube {cube} has max weight {} below its parent's {}",
                    status.max_weight, parent_status.max_weight,
                ));
            }
        }

        Ok(())
    }
}
