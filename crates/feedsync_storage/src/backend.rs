//! State backend trait definition.

use crate::error::{StorageError, StorageResult};
use std::sync::Arc;

/// A keyed store of opaque documents.
///
/// Backends do not interpret what they store; checkpoint, snapshot and
/// variant formats are owned by the engine.
///
/// # Invariants
///
/// - `write` replaces a document atomically: a reader after a crash sees
///   either the previous bytes or the new bytes, never a mix
/// - `write` returns only after the data is durable
/// - `list` returns keys in ascending lexical order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Keys
///
/// Keys are `/`-separated relative paths built from ASCII letters, digits,
/// `.`, `_` and `-`. Segments may not be empty, `.` or `..`.
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StateBackend: Send + Sync {
    /// Reads a document, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically creates or replaces a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes a document. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Lists keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

impl<B: StateBackend + ?Sized> StateBackend for Arc<B> {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        (**self).write(key, data)
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        (**self).remove(key)
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).list(prefix)
    }
}

/// Validates a storage key.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    };
    if key.is_empty() || !key.split('/').all(valid_segment) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_key("checkpoints/abc-123.json").is_ok());
        assert!(validate_key("variants.json").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        for key in ["", "/abs", "a//b", "../up", "a/./b", "a b", "a\\b"] {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
