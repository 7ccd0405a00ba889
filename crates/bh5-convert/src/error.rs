//! Error types for the conversion pipeline.
//!
//! Only fatal conditions are errors. Segment-fatal and record-dropped
//! conditions (see the router modules) are reported as diagnostics and
//! tallied in the conversion report instead.

use thiserror::Error;

/// Fatal conversion errors. Any of these aborts the whole conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid source file format (magic '{0}')")]
    UnrecognizedFormat(String),

    #[error("Cannot read source file header")]
    TruncatedHeader,

    #[error("Invalid channel ID {id} in source file header")]
    InvalidChannelId { id: u16 },

    #[error("Invalid trackable ID {id} in source file header")]
    InvalidTrackableId { id: u16 },

    #[error("Invalid digital input mode {mode} in source file header")]
    InvalidDigitalMode { mode: u8 },

    #[error("Invalid number of channels in source file header: {got} (max {max})")]
    TooManyChannels { got: u32, max: u16 },

    #[error("Invalid source file extended header: expected '{expected}', got '{got}'")]
    BadExtendedHeaderTag { expected: String, got: String },

    #[error("Source file is empty or invalid")]
    EmptyData,

    #[error("Invalid source file (cannot read data header)")]
    MissingDataHeader,

    #[error("Cannot read source file attributes")]
    SourceMetadata(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container error: {0}")]
    Container(#[from] bh5_format::FormatError),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
