// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Column data type
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit float
    Float32,

    /// 64-bit float
    Float64,

    /// Microseconds since the unix epoch
    Timestamp,

    /// UTF-8 string
    String,
}

impl DataType {
    /// Returns `true` for types a linear transformer can scale.
    #[must_use]
    pub fn is_ordered(self) -> bool {
        !matches!(self, Self::String)
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Int32 => 0,
            DataType::Int64 => 1,
            DataType::Float32 => 2,
            DataType::Float64 => 3,
            DataType::Timestamp => 4,
            DataType::String => 5,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Int32),
            1 => Ok(Self::Int64),
            2 => Ok(Self::Float32),
            3 => Ok(Self::Float64),
            4 => Ok(Self::Timestamp),
            5 => Ok(Self::String),
            _ => Err(()),
        }
    }
}

/// A single column value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    /// 32-bit signed integer
    Int32(i32),

    /// 64-bit signed integer
    Int64(i64),

    /// 32-bit float
    Float32(f32),

    /// 64-bit float
    Float64(f64),

    /// Microseconds since the unix epoch
    Timestamp(i64),

    /// UTF-8 string
    String(String),
}

impl ColumnValue {
    /// The data type of this value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::String(_) => DataType::String,
        }
    }

    /// Appends the stable raw byte representation fed into the weight hash.
    ///
    /// Strings are length-prefixed so concatenating multiple columns
    /// stays injective.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_raw_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Int64(v) | Self::Timestamp(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Float32(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::Float64(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::String(v) => {
                buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
                buf.extend_from_slice(v.as_bytes());
            }
        }
    }

    /// The value as a float, for linear scaling.
    ///
    /// Strings have no meaningful order here and return `None`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) | Self::Timestamp(v) => Some(*v as f64),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            Self::String(_) => None,
        }
    }

    /// Approximate in-memory size in bytes.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        match self {
            Self::Int32(_) | Self::Float32(_) => 4,
            Self::Int64(_) | Self::Float64(_) | Self::Timestamp(_) => 8,
            Self::String(v) => std::mem::size_of::<String>() + v.len(),
        }
    }

    /// Decodes a value of the given type.
    pub fn decode_typed<R: Read>(
        reader: &mut R,
        data_type: DataType,
    ) -> Result<Self, DecodeError> {
        Ok(match data_type {
            DataType::Int32 => Self::Int32(reader.read_i32::<BigEndian>()?),
            DataType::Int64 => Self::Int64(reader.read_i64::<BigEndian>()?),
            DataType::Float32 => Self::Float32(f32::from_bits(reader.read_u32::<BigEndian>()?)),
            DataType::Float64 => Self::Float64(f64::from_bits(reader.read_u64::<BigEndian>()?)),
            DataType::Timestamp => Self::Timestamp(reader.read_i64::<BigEndian>()?),
            DataType::String => {
                let len = reader.read_u32::<BigEndian>()?;
                let mut buf = vec![0u8; len as usize];
                reader.read_exact(&mut buf)?;
                Self::String(String::from_utf8(buf)?)
            }
        })
    }
}

impl Encode for ColumnValue {
    /// Encodes without a type tag; the schema provides the type on decode.
    #[allow(clippy::cast_possible_truncation)]
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::Int32(v) => writer.write_i32::<BigEndian>(*v)?,
            Self::Int64(v) | Self::Timestamp(v) => writer.write_i64::<BigEndian>(*v)?,
            Self::Float32(v) => writer.write_u32::<BigEndian>(v.to_bits())?,
            Self::Float64(v) => writer.write_u64::<BigEndian>(v.to_bits())?,
            Self::String(v) => {
                writer.write_u32::<BigEndian>(v.len() as u32)?;
                writer.write_all(v.as_bytes())?;
            }
        }

        Ok(())
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f32> for ColumnValue {
    fn from(value: f32) -> Self {
        Self::Float32(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A named, typed column
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    data_type: DataType,
}

impl Field {
    /// Creates a new field.
    pub fn new<S: Into<String>>(name: S, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// An ordered list of fields describing a row layout
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a new schema.
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// The schema's fields.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the field with the given name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Checks a row's arity and types against the schema.
    pub fn check_row(&self, row: &Row) -> crate::Result<()> {
        if row.len() != self.fields.len() {
            return Err(crate::Error::SchemaMismatch(format!(
                "row has {} values, schema has {} fields",
                row.len(),
                self.fields.len(),
            )));
        }

        for (value, field) in row.values().iter().zip(&self.fields) {
            if value.data_type() != field.data_type() {
                return Err(crate::Error::SchemaMismatch(format!(
                    "column {:?} expects {:?}, got {:?}",
                    field.name(),
                    field.data_type(),
                    value.data_type(),
                )));
            }
        }

        Ok(())
    }
}

impl Encode for Schema {
    #[allow(clippy::cast_possible_truncation)]
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // NOTE: Max field count = u16
        writer.write_u16::<BigEndian>(self.fields.len() as u16)?;

        for field in &self.fields {
            writer.write_u8(field.data_type().into())?;

            // NOTE: Max field name length = u16
            writer.write_u16::<BigEndian>(field.name().len() as u16)?;
            writer.write_all(field.name().as_bytes())?;
        }

        Ok(())
    }
}

impl Decode for Schema {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let field_count = reader.read_u16::<BigEndian>()?;

        let mut fields = Vec::with_capacity(field_count.into());

        for _ in 0..field_count {
            let type_tag = reader.read_u8()?;
            let data_type = DataType::try_from(type_tag)
                .map_err(|()| DecodeError::InvalidTag(("DataType", type_tag)))?;

            let name_len = reader.read_u16::<BigEndian>()?;
            let mut name = vec![0u8; name_len.into()];
            reader.read_exact(&mut name)?;

            fields.push(Field::new(String::from_utf8(name)?, data_type));
        }

        Ok(Self { fields })
    }
}

/// A single row of column values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row(Vec<ColumnValue>);

impl Row {
    /// Creates a new row.
    #[must_use]
    pub fn new(values: Vec<ColumnValue>) -> Self {
        Self(values)
    }

    /// The row's values.
    #[must_use]
    pub fn values(&self) -> &[ColumnValue] {
        &self.0
    }

    /// The value at the given position.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&ColumnValue> {
        self.0.get(idx)
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the row is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Approximate in-memory size in bytes.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .0
                .iter()
                .map(ColumnValue::approximate_size)
                .sum::<usize>()
    }
}
