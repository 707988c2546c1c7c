//! Error types for k2v
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for k2v operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the k2v store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (short reads, short writes, fsync failures)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The file is not a store, is truncated, or has no valid checkpoint
    #[error("Invalid store format: {0}")]
    Format(String),

    /// A record did not have the shape its reference promised
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Operation on a store, query or update that was already closed
    #[error("{0} is closed")]
    Closed(&'static str),

    /// An earlier operation on this update failed; it can only be closed
    #[error("Update is corrupted by an earlier failure and must be closed")]
    TransactionCorrupted,

    /// Refused to overwrite an existing file
    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A document handle was passed to a query on another store
    #[error("{0} belongs to a different store")]
    Foreign(&'static str),

    /// Another process holds the store file open
    #[error("Store is already in use by another process: {0}")]
    InUse(PathBuf),

    /// Store configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl Error {
    /// Shorthand for a [`Error::Format`] with a static message.
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Shorthand for a [`Error::Corruption`] with a static message.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// True for errors that mean the bytes on disk cannot be trusted.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Error::Format(_) | Error::Corruption(_))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(e) => e,
            Error::Format(_) | Error::Corruption(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Write buffer is below the minimum size
    #[error("Write buffer must be at least {min} bytes, got {actual}")]
    WriteBufferTooSmall {
        /// Minimum accepted size
        min: usize,
        /// Configured size
        actual: usize,
    },

    /// Recovery scan window cannot hold a commit footer
    #[error("Scan window must be at least {min} bytes, got {actual}")]
    ScanWindowTooSmall {
        /// Minimum accepted size
        min: usize,
        /// Configured size
        actual: usize,
    },
}
