// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hash functions shared by the write path and the sample filter.
//!
//! The weight hash MUST be the same function on both sides: the indexer uses
//! it to place rows into cubes, and the sample predicate re-evaluates it to
//! filter rows at scan time. The seed is fixed per deployment, not per table,
//! so filter predicates and writer decisions always agree.

/// 32-bit weight hash over the concatenated raw bytes of the indexed columns.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn hash32(bytes: &[u8], seed: u32) -> i32 {
    xxhash_rust::xxh32::xxh32(bytes, seed) as i32
}

/// 64-bit hash, used by the categorical (hashed) transformer.
#[must_use]
pub fn hash64(bytes: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(bytes, seed)
}

/// The weight of a row: hash of the concatenated raw bytes of its indexed
/// columns.
///
/// `positions` are the indexed columns' offsets into the row, in index
/// order. Identical keys produce identical weights.
#[must_use]
pub fn row_weight(row: &crate::Row, positions: &[usize], seed: u32) -> crate::Weight {
    let mut buf = vec![];

    for pos in positions {
        if let Some(value) = row.get(*pos) {
            value.write_raw_bytes(&mut buf);
        }
    }

    crate::Weight(hash32(&buf, seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn hash32_is_deterministic() {
        assert_eq!(hash32(b"hello", 42), hash32(b"hello", 42));
        assert_ne!(hash32(b"hello", 42), hash32(b"hello", 43));
        assert_ne!(hash32(b"hello", 42), hash32(b"world", 42));
    }

    #[test]
    fn hash64_is_deterministic() {
        assert_eq!(hash64(b"hello", 42), hash64(b"hello", 42));
        assert_ne!(hash64(b"hello", 42), hash64(b"hello", 43));
    }
}
