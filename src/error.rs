// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    cube::CubeId,
    revision::RevisionId,
};

/// Represents errors that can occur in the indexing engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// A transaction-log record could not be read or written as JSON
    Json(serde_json::Error),

    /// A column named in `columnsToIndex` does not exist in the write schema
    MissingIndexedColumn(String),

    /// A row does not match the schema it is written or staged under
    SchemaMismatch(String),

    /// The commit lost the version race more times than `number_of_retries` allows
    CommitConflict {
        /// How many attempts were made before giving up
        attempts: usize,
    },

    /// A concurrent commit installed a different revision mid-write
    RevisionMismatch {
        /// The revision the write was planned against
        expected: RevisionId,

        /// The revision found in the log
        found: RevisionId,
    },

    /// A worker partition failed even after being retried
    WriterIo {
        /// Zero-based partition index
        partition: usize,

        /// How many attempts were made
        attempts: usize,

        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The write was cancelled via its stop signal
    WriteCancelled,

    /// The requested revision does not exist in the log
    UnknownRevision(RevisionId),

    /// A cube named in an optimize request does not exist in the
    /// revision's tree
    UnknownCube(CubeId),

    /// A write option could not be parsed
    InvalidWriteOption(String),

    /// An internal invariant was violated
    Unrecoverable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OTreeError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::WriterIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Index result
pub type Result<T> = std::result::Result<T, Error>;
