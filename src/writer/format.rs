// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode},
    row::{ColumnValue, Row, Schema},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

pub const MAGIC_BYTES: [u8; 4] = [b'O', b'T', b'B', 1];

/// Trailer: u64 row count + magic bytes
const TRAILER_LEN: i64 = 8 + MAGIC_BYTES.len() as i64;

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

/// Writes rows of one cube into a single immutable file.
///
/// Layout: magic, schema, the rows in write order, then a trailer with the
/// row count and the magic again. The schema travels with the file, so old
/// files stay readable after the table schema picks up new revisions.
pub struct RowFileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    item_count: u64,
}

impl RowFileWriter {
    /// Creates the file and writes the header.
    pub fn create(path: PathBuf, schema: &Schema) -> crate::Result<Self> {
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(u16::MAX.into(), file);

        writer.write_all(&MAGIC_BYTES)?;
        schema.encode_into(&mut writer)?;

        Ok(Self {
            writer,
            path,
            item_count: 0,
        })
    }

    /// Appends one row.
    pub fn write(&mut self, row: &Row) -> crate::Result<()> {
        for value in row.values() {
            value.encode_into(&mut self.writer)?;
        }

        self.item_count += 1;
        Ok(())
    }

    /// Writes the trailer and makes the file durable.
    ///
    /// Returns the row count and final file length.
    pub fn finish(mut self) -> crate::Result<(u64, u64)> {
        self.writer.write_u64::<BigEndian>(self.item_count)?;
        self.writer.write_all(&MAGIC_BYTES)?;

        self.writer.flush()?;
        self.writer.get_mut().sync_all()?;

        let len = self.writer.stream_position()?;

        Ok((self.item_count, len))
    }

    /// Drops the writer and deletes the partial file.
    pub fn abort(self) {
        let path = self.path.clone();
        drop(self);

        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("failed to delete aborted file {path:?}: {e}");
        }
    }
}

/// Streams the rows of a block file back.
pub struct BlockReader {
    reader: BufReader<File>,
    schema: Schema,
    remaining: u64,
}

impl BlockReader {
    /// Opens a block file, verifying header and trailer.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let mut file = File::open(path)?;

        // Trailer first, so truncated files are rejected up front
        file.seek(SeekFrom::End(-TRAILER_LEN))?;

        let item_count = file.read_u64::<BigEndian>()?;

        let mut magic = [0u8; MAGIC_BYTES.len()];
        file.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("BlockTrailer").into());
        }

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("BlockHeader").into());
        }

        let schema = Schema::decode_from(&mut reader)?;

        Ok(Self {
            reader,
            schema,
            remaining: item_count,
        })
    }

    /// The schema the file was written with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Iterator for BlockReader {
    type Item = crate::Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut values = Vec::with_capacity(self.schema.len());

        for field in self.schema.fields() {
            let value = fail_iter!(ColumnValue::decode_typed(
                &mut self.reader,
                field.data_type()
            ));

            values.push(value);
        }

        self.remaining -= 1;
        Some(Ok(Row::new(values)))
    }
}
