// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::de::{self, Deserialize, Deserializer};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::io::{Read, Write};

/// Deepest representable tree level.
///
/// Bounded so per-dimension coordinates scale losslessly into a u64.
pub const MAX_DEPTH: usize = 62;

/// Identifies a node of the `2^d`-ary space-partitioning tree.
///
/// A cube covers a hyper-rectangle of the normalized `[0,1]^d` key space.
/// The root covers the unit hyper-cube; children bisect every dimension, so
/// each tree level adds `d` bits: bit `i` of a child index selects the upper
/// half of dimension `i`.
///
/// The identifier is the path from the root, stored as a packed bit-string.
/// Parent and child identifiers are computed from the bits, never stored as
/// references.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CubeId {
    dims: u32,

    /// Packed bit-string, MSB-first, left-aligned
    bits: Vec<u8>,

    bit_len: usize,
}

impl CubeId {
    /// The root cube of a `dims`-dimensional tree.
    ///
    /// # Panics
    ///
    /// Panics if `dims` is 0 or ridiculously large.
    #[must_use]
    pub fn root(dims: u32) -> Self {
        assert!(dims >= 1, "cube needs at least one dimension");
        assert!(dims <= 16, "too many indexed columns");

        Self {
            dims,
            bits: vec![],
            bit_len: 0,
        }
    }

    /// Number of dimensions (indexed columns).
    #[must_use]
    pub fn dims(&self) -> u32 {
        self.dims
    }

    /// Tree depth; the root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.bit_len / (self.dims as usize)
    }

    /// Returns `true` for the root cube.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.bit_len == 0
    }

    fn bit(&self, idx: usize) -> bool {
        let byte = self.bits.get(idx / 8).copied().unwrap_or_default();
        (byte >> (7 - (idx % 8))) & 1 == 1
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.bits.push(0);
        }

        if bit {
            if let Some(byte) = self.bits.last_mut() {
                *byte |= 1 << (7 - (self.bit_len % 8));
            }
        }

        self.bit_len += 1;
    }

    /// The parent cube, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        let parent_len = self.bit_len - self.dims as usize;

        let mut parent = Self::root(self.dims);

        for idx in 0..parent_len {
            parent.push_bit(self.bit(idx));
        }

        Some(parent)
    }

    /// The `k`-th child cube.
    ///
    /// Bit `i` of `k` selects the upper half of dimension `i`.
    ///
    /// # Panics
    ///
    /// Panics if `k` is out of range or the maximum depth is exceeded.
    #[must_use]
    pub fn child(&self, k: u32) -> Self {
        assert!(k < self.child_count(), "child index out of range");
        assert!(self.depth() < MAX_DEPTH, "tree too deep");

        let mut child = self.clone();

        for dim in 0..self.dims {
            child.push_bit((k >> dim) & 1 == 1);
        }

        child
    }

    /// Number of children (`2^d`).
    #[must_use]
    pub fn child_count(&self) -> u32 {
        1 << self.dims
    }

    /// Iterates over all `2^d` children.
    pub fn children(&self) -> impl Iterator<Item = Self> + '_ {
        (0..self.child_count()).map(|k| self.child(k))
    }

    /// Returns `true` if `self` is a proper ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.dims != other.dims || self.bit_len >= other.bit_len {
            return false;
        }

        (0..self.bit_len).all(|idx| self.bit(idx) == other.bit(idx))
    }

    fn scale(coord: f64, depth: usize) -> u64 {
        let cells = 1u64 << depth;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        let cell = (coord.clamp(0.0, 1.0) * cells as f64) as u64;

        cell.min(cells - 1)
    }

    /// The cube at the given depth containing a point of `[0,1]^d`.
    ///
    /// # Panics
    ///
    /// Panics if the point is empty or the depth exceeds [`MAX_DEPTH`].
    #[must_use]
    pub fn from_point(point: &[f64], depth: usize) -> Self {
        assert!(depth <= MAX_DEPTH, "tree too deep");

        #[allow(clippy::cast_possible_truncation)]
        let mut cube = Self::root(point.len() as u32);

        let scaled = point
            .iter()
            .map(|coord| Self::scale(*coord, depth))
            .collect::<Vec<_>>();

        for level in 0..depth {
            for cell in &scaled {
                cube.push_bit((cell >> (depth - 1 - level)) & 1 == 1);
            }
        }

        cube
    }

    /// Returns `true` if the point falls inside this cube's region.
    #[must_use]
    pub fn contains_point(&self, point: &[f64]) -> bool {
        if point.len() != self.dims as usize {
            return false;
        }

        Self::from_point(point, self.depth()) == *self
    }

    /// The child cube whose region contains the point.
    #[must_use]
    pub fn child_containing(&self, point: &[f64]) -> Self {
        debug_assert!(self.contains_point(point), "point outside cube");

        Self::from_point(point, self.depth() + 1)
    }

    /// Compact name for file naming: `root`, or hex bits plus bit count.
    #[must_use]
    pub fn to_name(&self) -> String {
        if self.is_root() {
            return "root".into();
        }

        let mut name = String::with_capacity(self.bits.len() * 2 + 4);

        for byte in &self.bits {
            name.push_str(&format!("{byte:02x}"));
        }

        name.push_str(&format!("x{}", self.bit_len));
        name
    }

    /// Serializes into the raw tag form: packed bits plus a trailing byte
    /// holding the bit-length modulo 8.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bits.clone();

        #[allow(clippy::cast_possible_truncation)]
        bytes.push((self.bit_len % 8) as u8);

        bytes
    }

    /// Parses the raw tag form; the dimension count comes from the revision.
    pub fn from_bytes(bytes: &[u8], dims: u32) -> Result<Self, DecodeError> {
        let Some((&rem, data)) = bytes.split_last() else {
            return Err(DecodeError::InvalidHeader("CubeId"));
        };

        if rem >= 8 {
            return Err(DecodeError::InvalidTag(("CubeId", rem)));
        }

        let bit_len = if data.is_empty() {
            0
        } else {
            (data.len() - 1) * 8 + if rem == 0 { 8 } else { usize::from(rem) }
        };

        if dims == 0 || bit_len % (dims as usize) != 0 {
            return Err(DecodeError::InvalidHeader("CubeId"));
        }

        let cube = Self {
            dims,
            bits: data.to_vec(),
            bit_len,
        };

        // Padding bits must be zero so equal cubes compare equal bytewise
        for idx in bit_len..data.len() * 8 {
            if cube.bit(idx) {
                return Err(DecodeError::InvalidHeader("CubeId"));
            }
        }

        Ok(cube)
    }

    fn to_tag_string(&self) -> String {
        let mut tag = format!("{}:{}:", self.dims, self.bit_len);

        for byte in &self.bits {
            tag.push_str(&format!("{byte:02x}"));
        }

        tag
    }

    fn from_tag_string(tag: &str) -> Option<Self> {
        let mut parts = tag.splitn(3, ':');

        let dims = parts.next()?.parse::<u32>().ok()?;
        let bit_len = parts.next()?.parse::<usize>().ok()?;
        let hex = parts.next()?;

        if dims == 0 || dims > 16 || hex.len() % 2 != 0 {
            return None;
        }

        let mut bits = Vec::with_capacity(hex.len() / 2);

        for chunk in 0..hex.len() / 2 {
            let byte = u8::from_str_radix(hex.get(chunk * 2..chunk * 2 + 2)?, 16).ok()?;
            bits.push(byte);
        }

        if bits.len() != bit_len.div_ceil(8) || bit_len % (dims as usize) != 0 {
            return None;
        }

        let cube = Self {
            dims,
            bits,
            bit_len,
        };

        for idx in bit_len..cube.bits.len() * 8 {
            if cube.bit(idx) {
                return None;
            }
        }

        Some(cube)
    }
}

impl std::fmt::Display for CubeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "root");
        }

        for idx in 0..self.bit_len {
            write!(f, "{}", u8::from(self.bit(idx)))?;
        }

        Ok(())
    }
}

impl PartialOrd for CubeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CubeId {
    /// Lexicographic over the bit prefix; ancestors precede descendants.
    fn cmp(&self, other: &Self) -> Ordering {
        let common = self.bit_len.min(other.bit_len);

        for idx in 0..common {
            match (self.bit(idx), other.bit(idx)) {
                (false, true) => return Ordering::Less,
                (true, false) => return Ordering::Greater,
                _ => {}
            }
        }

        self.bit_len.cmp(&other.bit_len)
    }
}

impl Encode for CubeId {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let bytes = self.to_bytes();

        // NOTE: Max serialized cube length = u8 - covers depth 500+ even
        // with 16 dimensions
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u8(bytes.len() as u8)?;
        writer.write_all(&bytes)?;

        Ok(())
    }
}

impl CubeId {
    /// Deserializes the length-prefixed binary form.
    pub fn decode_with_dims<R: Read>(reader: &mut R, dims: u32) -> Result<Self, DecodeError> {
        let len = reader.read_u8()?;

        let mut bytes = vec![0u8; len.into()];
        reader.read_exact(&mut bytes)?;

        Self::from_bytes(&bytes, dims)
    }
}

impl Serialize for CubeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_tag_string())
    }
}

impl<'de> Deserialize<'de> for CubeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Self::from_tag_string(&tag).ok_or_else(|| de::Error::custom("invalid cube id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn cube_root() {
        let root = CubeId::root(2);
        assert_eq!(0, root.depth());
        assert!(root.is_root());
        assert_eq!(None, root.parent());
        assert_eq!(4, root.child_count());
    }

    #[test]
    fn cube_child_parent_round_trip() {
        let root = CubeId::root(3);

        for k in 0..root.child_count() {
            let child = root.child(k);
            assert_eq!(1, child.depth());
            assert_eq!(Some(root.clone()), child.parent());

            for j in 0..child.child_count() {
                let grandchild = child.child(j);
                assert_eq!(2, grandchild.depth());
                assert_eq!(Some(child.clone()), grandchild.parent());
                assert!(root.is_ancestor_of(&grandchild));
                assert!(child.is_ancestor_of(&grandchild));
                assert!(!grandchild.is_ancestor_of(&child));
            }
        }
    }

    #[test]
    fn cube_children_are_distinct() {
        let root = CubeId::root(2);
        let children = root.children().collect::<Vec<_>>();

        for (idx, a) in children.iter().enumerate() {
            for b in children.iter().skip(idx + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn cube_from_point_depth_zero_is_root() {
        assert_eq!(CubeId::root(2), CubeId::from_point(&[0.3, 0.7], 0));
    }

    #[test]
    fn cube_from_point_one_level() {
        // bit i of the child index selects the upper half of dimension i
        let lower_lower = CubeId::from_point(&[0.2, 0.2], 1);
        assert_eq!(CubeId::root(2).child(0), lower_lower);

        let upper_lower = CubeId::from_point(&[0.8, 0.2], 1);
        assert_eq!(CubeId::root(2).child(1), upper_lower);

        let lower_upper = CubeId::from_point(&[0.2, 0.8], 1);
        assert_eq!(CubeId::root(2).child(2), lower_upper);

        let upper_upper = CubeId::from_point(&[0.8, 0.8], 1);
        assert_eq!(CubeId::root(2).child(3), upper_upper);
    }

    #[test]
    fn cube_from_point_nested() {
        let point = [0.1, 0.6];

        for depth in 0..10 {
            let cube = CubeId::from_point(&point, depth);
            let deeper = CubeId::from_point(&point, depth + 1);

            assert!(cube.contains_point(&point));
            assert!(cube.is_ancestor_of(&deeper));
            assert_eq!(deeper, cube.child_containing(&point));
        }
    }

    #[test]
    fn cube_boundary_point() {
        // 1.0 must stay inside the top cell at any depth
        let cube = CubeId::from_point(&[1.0, 1.0], 5);
        assert_eq!(5, cube.depth());
        assert!(cube.contains_point(&[1.0, 1.0]));
    }

    #[test]
    fn cube_ordering_ancestors_first() {
        let root = CubeId::root(2);
        let c0 = root.child(0);
        let c3 = root.child(3);
        let c0_0 = c0.child(0);

        assert!(root < c0);
        assert!(root < c3);
        assert!(c0 < c0_0);
        assert!(c0_0 < c3);

        let mut sorted = vec![c3.clone(), c0_0.clone(), root.clone(), c0.clone()];
        sorted.sort();
        assert_eq!(vec![root, c0, c0_0, c3], sorted);
    }

    #[test]
    fn cube_bytes_round_trip() -> crate::Result<()> {
        let cubes = [
            CubeId::root(2),
            CubeId::root(2).child(3),
            CubeId::root(2).child(3).child(1).child(2),
            CubeId::from_point(&[0.123, 0.456, 0.789], 7),
        ];

        for cube in cubes {
            let bytes = cube.to_bytes();
            let copy = CubeId::from_bytes(&bytes, cube.dims())?;
            assert_eq!(cube, copy);
        }

        Ok(())
    }

    #[test]
    fn cube_binary_codec_round_trip() -> crate::Result<()> {
        let cube = CubeId::from_point(&[0.9, 0.1], 9);

        let bytes = cube.encode_into_vec();
        let copy = CubeId::decode_with_dims(&mut &bytes[..], 2)?;

        assert_eq!(cube, copy);
        Ok(())
    }

    #[test]
    fn cube_serde_round_trip() -> crate::Result<()> {
        let cubes = [CubeId::root(4), CubeId::from_point(&[0.5, 0.25], 6)];

        for cube in cubes {
            let json = serde_json::to_string(&cube)?;
            let copy = serde_json::from_str::<CubeId>(&json)?;
            assert_eq!(cube, copy);
        }

        Ok(())
    }

    #[test]
    fn cube_rejects_garbage_bytes() {
        assert!(CubeId::from_bytes(&[], 2).is_err());
        assert!(CubeId::from_bytes(&[9], 2).is_err());

        // padding bits must be zero
        assert!(CubeId::from_bytes(&[0b0000_0101, 2], 2).is_err());

        // bit length must be a multiple of the dimension count
        assert!(CubeId::from_bytes(&[0b1000_0000, 1], 2).is_err());
    }
}
