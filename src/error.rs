//! Error types for the spilling sorted map.

use std::io;

/// The result type used throughout spillmap.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for spillmap operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected while reading a segment file.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The requested element does not exist (e.g. `first_key` on an empty map).
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state, e.g. mutating a
    /// persisted segment that has not been loaded.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// A freshly written segment file failed read-back verification.
    #[error("Verification failed for {file}: {reason}")]
    Verification {
        /// Name of the segment file.
        file: String,
        /// What did not match.
        reason: String,
    },

    /// Every storage location and retry was used up without a successful write.
    #[error("Unable to persist {what} using the configured storage locations ({} failures)", .causes.len())]
    Exhausted {
        /// What was being written ("buffer", "compaction").
        what: String,
        /// One entry per failed location, `(location, cause)`.
        causes: Vec<(String, String)>,
    },
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new verification error.
    pub fn verification(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Verification { file: file.into(), reason: reason.into() }
    }

    /// Returns true for failures caused by the environment (I/O, corrupt
    /// files) rather than by calling operations in the wrong order.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Corruption(_)
                | Error::ChecksumMismatch { .. }
                | Error::Verification { .. }
                | Error::Exhausted { .. }
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
