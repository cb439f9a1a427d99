//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key is empty, absolute or escapes the store root.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// Another process holds the state directory lock.
    #[error("state directory locked: another process has exclusive access")]
    Locked,

    /// The state directory path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),
}
