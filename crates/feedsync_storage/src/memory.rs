//! In-memory state backend for testing.

use crate::backend::{validate_key, StateBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory state backend.
///
/// This backend keeps every document in a map and is suitable for:
/// - Unit tests
/// - Integration tests with fake collaborators
/// - Dry runs that must not touch the state directory
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use feedsync_storage::{InMemoryBackend, StateBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("checkpoints/run-1.json", b"{}").unwrap();
/// assert_eq!(backend.read("checkpoints/run-1.json").unwrap(), Some(b"{}".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    documents: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl StateBackend for InMemoryBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.documents.read().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.documents.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.documents.write().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .documents
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.read("missing").unwrap(), None);
    }

    #[test]
    fn memory_write_replaces() {
        let backend = InMemoryBackend::new();
        backend.write("doc", b"one").unwrap();
        backend.write("doc", b"two").unwrap();
        assert_eq!(backend.read("doc").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_remove_reports_existence() {
        let backend = InMemoryBackend::new();
        backend.write("doc", b"x").unwrap();
        assert!(backend.remove("doc").unwrap());
        assert!(!backend.remove("doc").unwrap());
    }

    #[test]
    fn memory_list_filters_by_prefix() {
        let backend = InMemoryBackend::new();
        backend.write("mappings/000002.json", b"b").unwrap();
        backend.write("mappings/000001.json", b"a").unwrap();
        backend.write("variants.json", b"v").unwrap();

        let keys = backend.list("mappings/").unwrap();
        assert_eq!(keys, vec!["mappings/000001.json", "mappings/000002.json"]);
    }

    #[test]
    fn memory_rejects_bad_keys() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.write("../escape", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
