// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod format;

pub use format::BlockReader;

use crate::{
    block::{Block, BlockTags, CubeState},
    cube::CubeId,
    revision::Revision,
    row::{Row, Schema},
    time::unix_timestamp,
    weight::Weight,
    HashMap,
};
use format::{fsync_directory, RowFileWriter};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

/// Cancels an in-flight write.
///
/// A cancelled write closes and deletes its open output files and commits
/// nothing; already-written bytes are left to the external garbage collector
/// if the process dies first.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-process counter so retried writes never reuse a file name
static NEXT_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn block_file_name(revision: &Revision, cube: &CubeId) -> String {
    let seq = NEXT_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    let stamp = unix_timestamp().as_micros();

    format!(
        "{}-{}-{stamp}-{seq}.blk",
        revision.revision_id(),
        cube.to_name(),
    )
}

struct OpenBlock {
    writer: RowFileWriter,
    name: String,
    min_weight: Weight,
}

/// Packs assigned rows into one output file per cube.
///
/// Rows arrive in batch order; the writer keeps one open file per cube and
/// tracks each block's running minimum weight. `finish` closes every file,
/// reads length and modification time back from the filesystem, and emits
/// one tagged [`Block`] per cube.
pub struct BlockWriter<'a> {
    folder: PathBuf,
    schema: &'a Schema,
    revision: &'a Revision,
    stop: StopSignal,
    open: HashMap<CubeId, OpenBlock>,
}

impl<'a> BlockWriter<'a> {
    /// Sets up a block writer under the given table folder.
    pub fn new<P: Into<PathBuf>>(
        folder: P,
        schema: &'a Schema,
        revision: &'a Revision,
        stop: StopSignal,
    ) -> Self {
        Self {
            folder: folder.into(),
            schema,
            revision,
            stop,
            open: HashMap::default(),
        }
    }

    /// Writes one row into its cube's block.
    pub fn write(&mut self, row: &Row, cube: &CubeId, weight: Weight) -> crate::Result<()> {
        if self.stop.is_cancelled() {
            self.abort();
            return Err(crate::Error::WriteCancelled);
        }

        if !self.open.contains_key(cube) {
            let name = block_file_name(self.revision, cube);
            let writer = RowFileWriter::create(self.folder.join(&name), self.schema)?;

            self.open.insert(
                cube.clone(),
                OpenBlock {
                    writer,
                    name,
                    min_weight: Weight::MAX,
                },
            );
        }

        if let Some(block) = self.open.get_mut(cube) {
            block.writer.write(row)?;
            block.min_weight = block.min_weight.min(weight);
        }

        Ok(())
    }

    /// Closes all blocks and emits their tags.
    ///
    /// `cutoffs` carries the per-cube assignment cutoff decided by the
    /// indexer; open cubes tag [`Weight::MAX`].
    pub fn finish(mut self, cutoffs: &HashMap<CubeId, Weight>) -> crate::Result<Vec<Block>> {
        if self.stop.is_cancelled() {
            self.abort();
            return Err(crate::Error::WriteCancelled);
        }

        let mut blocks = Vec::with_capacity(self.open.len());

        for (cube, open_block) in self.open.drain() {
            let (element_count, _) = open_block.writer.finish()?;

            // Length and modification time are read back from the
            // filesystem, which is what external readers will see
            let metadata = std::fs::metadata(self.folder.join(&open_block.name))?;

            let modified_ms = metadata
                .modified()?
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

            let max_weight = cutoffs.get(&cube).copied().unwrap_or(Weight::MAX);

            blocks.push(Block {
                path: open_block.name,
                size: metadata.len(),
                modified_ms,
                tags: BlockTags {
                    cube,
                    revision_id: self.revision.revision_id(),
                    min_weight: open_block.min_weight,
                    max_weight,
                    state: CubeState::Flooded,
                    element_count,
                },
            });
        }

        fsync_directory(&self.folder)?;

        log::debug!(
            "written {} rows into {} blocks",
            blocks.iter().map(|b| b.tags.element_count).sum::<u64>(),
            blocks.len(),
        );

        Ok(blocks)
    }

    /// Closes and deletes every open file.
    pub fn abort(&mut self) {
        for (_, open_block) in self.open.drain() {
            open_block.writer.abort();
        }
    }
}
