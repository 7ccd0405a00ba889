//! Error types for the BH5 container crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading or writing BH5 files.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic bytes: not a BH5 file")]
    InvalidMagic,

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u16),

    #[error("Destination file already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Duplicate name '{name}' under group {parent}")]
    DuplicateName { parent: u32, name: String },

    #[error("No such group: {0}")]
    UnknownGroup(u32),

    #[error("No such stream: {0}")]
    UnknownStream(u32),

    #[error("Stream '{0}' is closed")]
    StreamClosed(String),

    #[error("Payload of {len} bytes does not hold {count} records of {expected} bytes")]
    PayloadSize {
        len: usize,
        count: u32,
        expected: usize,
    },

    #[error("Attribute '{0}' not found")]
    AttrNotFound(String),

    #[error("Group path '{0}' not found")]
    PathNotFound(String),

    #[error("Directory at {offset}+{len} exceeds file size {file_size}")]
    InvalidDirectory {
        offset: u64,
        len: u64,
        file_size: u64,
    },

    #[error("Malformed record in stream '{0}'")]
    MalformedRecord(String),

    #[error("Stream '{stream}' digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        stream: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;
