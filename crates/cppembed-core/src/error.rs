//! Error types for the cppembed-core library.
//!
//! Errors fall into two groups. Problems reading back a previously generated
//! output file are recoverable: the run degrades to "no prior state" and
//! re-embeds everything. Everything else aborts the run before any output is
//! written.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cppembed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all cppembed operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read an input or output file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Input file could not be opened, even after retrying
    #[error("failed to open file '{path}' after {attempts} attempts: {source}")]
    FileOpen {
        /// Path to the input file
        path: PathBuf,
        /// Total number of open attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        source: std::io::Error,
    },

    /// Input file exceeds the supported size
    #[error("file '{path}' is {size} bytes, bigger than the supported {max} bytes")]
    FileTooLarge {
        /// Path to the input file
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Timestamp of an input matches the recorded one but its size does not
    #[error(
        "timestamps match but sizes don't for '{name}': recorded {recorded} bytes, found {actual}"
    )]
    SizeMismatch {
        /// Logical name of the element
        name: String,
        /// Size stored in the previous output
        recorded: u64,
        /// Size of the file on disk
        actual: u64,
    },

    /// Previously generated output could not be parsed
    #[error("malformed output at line {line}: {details}")]
    MalformedOutput {
        /// 1-based line number where the problem was detected
        line: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// A reconstructed element is missing one of its fields
    #[error("element {index} is incomplete after parsing (missing {missing})")]
    IncompleteElement {
        /// Position of the element in the output
        index: usize,
        /// Name of the first missing field
        missing: &'static str,
    },

    /// A binary timestamp value is out of range or has an unsupported kind
    #[error("invalid timestamp value 0x{value:x}: {details}")]
    InvalidTimestamp {
        /// The raw encoded value
        value: i64,
        /// Detailed description of the issue
        details: String,
    },

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new malformed output error
    pub fn malformed(line: usize, details: impl Into<String>) -> Self {
        Self::MalformedOutput {
            line,
            details: details.into(),
        }
    }

    /// Creates a new invalid timestamp error
    pub fn invalid_timestamp(value: i64, details: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value,
            details: details.into(),
        }
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error only invalidates prior state and the run
    /// can continue by re-embedding everything
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedOutput { .. }
                | Self::IncompleteElement { .. }
                | Self::InvalidTimestamp { .. }
        )
    }
}
