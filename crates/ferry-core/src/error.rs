//! Error types for Ferry.
//!
//! This module provides a unified error type for all Ferry operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// Source file or directory not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Destination already exists and overwriting is disabled
    #[error("destination already exists: {0}")]
    DestinationExists(String),

    /// A chunk moved a different number of bytes than planned
    #[error("byte count mismatch: expected {expected} bytes, moved {actual}")]
    ByteCountMismatch {
        /// Bytes the chunk was planned to move
        expected: u64,
        /// Bytes actually moved
        actual: u64,
    },

    /// Transfer was cancelled
    #[error("transfer cancelled")]
    TransferCancelled,

    /// The client was shut down and accepts no more work
    #[error("transfer client has been shut down")]
    ClientShutdown,

    /// Assembling chunk artifacts into the destination failed
    #[error("merge into '{dst}' failed: {reason}")]
    MergeFailed {
        /// Final destination
        dst: String,
        /// Reason for failure
        reason: String,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether a chunk that failed with this error may be retried.
    ///
    /// Cancellation and malformed paths fail the same way on every attempt,
    /// so they go straight to the terminal state.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::TransferCancelled | Self::InvalidPath(_) | Self::ClientShutdown
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
