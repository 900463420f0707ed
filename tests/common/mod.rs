#![allow(dead_code)]

use otree::{Config, DataType, Field, MemoryLog, Row, Schema, Table, WriteOptions};
use std::path::Path;
use std::sync::Arc;

pub fn two_col_schema() -> Schema {
    Schema::new(vec![
        Field::new("cdemo", DataType::Int64),
        Field::new("hdemo", DataType::Int64),
    ])
}

/// Deterministic pseudo-spread rows over two numeric columns.
///
/// The column periods are coprime, so key pairs stay distinct for any range
/// used in the tests, while both domains are fully covered by the first
/// thousand rows (no accidental revision upgrades on later batches).
pub fn two_col_rows(range: std::ops::Range<i64>) -> Vec<Row> {
    range
        .map(|i| Row::new(vec![(i % 1_000).into(), ((i * 7 + 3) % 999).into()]))
        .collect()
}

pub fn open_memory_table<P: AsRef<Path>>(folder: P, cube_size: u64) -> otree::Result<Table> {
    Config::new(folder)
        .default_cube_size(cube_size)
        .open(Arc::new(MemoryLog::default()))
}

pub fn index_options() -> WriteOptions {
    WriteOptions::new().columns_to_index(["cdemo", "hdemo"])
}

/// Sorts rows by their debug form so multisets compare reliably.
pub fn sorted_rows(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|row| format!("{row:?}"));
    rows
}
