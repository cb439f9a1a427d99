//! Directory-backed collaborators.
//!
//! The engine talks to the storefront, the feed writer, the remote folder
//! and the mapping service through traits. These adapters implement them
//! over local files so the binary can run end to end:
//!
//! - [`JsonlCatalog`] reads variants from a JSON-lines export
//! - [`MappingFile`] reads the location to country mapping from JSON
//! - [`DirectoryFeedWriter`] renders one JSON-lines feed per country
//! - [`FolderUploader`] mirrors feeds into a folder standing in for the remote

mod catalog;
mod feeds;
mod mapping;
mod remote;

pub use catalog::JsonlCatalog;
pub use feeds::DirectoryFeedWriter;
pub use mapping::MappingFile;
pub use remote::FolderUploader;

use feedsync_engine::SyncError;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Maps an I/O failure onto the engine's error classes.
///
/// Timeouts and interruptions are worth retrying; permission problems are
/// treated like rejected credentials.
pub(crate) fn io_error(context: impl std::fmt::Display, err: io::Error) -> SyncError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => {
            SyncError::transient(format!("{context}: {err}"))
        }
        io::ErrorKind::PermissionDenied => SyncError::Authorization(format!("{context}: {err}")),
        _ => SyncError::collaborator(format!("{context}: {err}")),
    }
}

/// Replaces `path` with `bytes` via a synced temporary file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_engine::{Collaborators, Orchestrator, SyncConfig};
    use feedsync_storage::FileBackend;
    use feedsync_types::{Classification, Strategy};
    use std::sync::Arc;
    use tempfile::tempdir;

    const CATALOG: &str = concat!(
        r#"{"variant_id":"v1","revision":1,"location_ids":["loc1"],"attributes":{"title":"Mug"}}"#,
        "\n",
        r#"{"variant_id":"v2","revision":2,"location_ids":["loc2"],"attributes":{"title":"Cap"}}"#,
        "\n",
    );

    fn orchestrator(root: &Path) -> Orchestrator {
        let collaborators = Collaborators {
            products: Arc::new(JsonlCatalog::new(root.join("catalog.jsonl"))),
            feeds: Arc::new(DirectoryFeedWriter::new(root.join("feeds"))),
            uploads: Arc::new(FolderUploader::new(root.join("remote"))),
            mapping: Arc::new(MappingFile::new(root.join("mapping.json"))),
        };
        let backend = FileBackend::open(&root.join("state")).unwrap();
        Orchestrator::new(SyncConfig::new(), Arc::new(backend), collaborators).unwrap()
    }

    #[test]
    fn directory_collaborators_drive_a_sync() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("catalog.jsonl"), CATALOG).unwrap();
        fs::write(
            root.join("mapping.json"),
            r#"{"loc1": ["US"], "loc2": ["US", "DE"]}"#,
        )
        .unwrap();
        fs::create_dir_all(root.join("remote")).unwrap();
        fs::write(root.join("remote/FR.jsonl"), "stale\n").unwrap();

        let summary = orchestrator(root).run(None).unwrap();
        assert_eq!(summary.strategy, Strategy::Full);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.orphans_removed, 1);
        assert!(root.join("remote/US.jsonl").exists());
        assert!(root.join("remote/DE.jsonl").exists());
        assert!(!root.join("remote/FR.jsonl").exists());

        // loc1 starts serving DE: only v1 is re-exported, merged into DE
        fs::write(
            root.join("mapping.json"),
            r#"{"loc1": ["US", "DE"], "loc2": ["US", "DE"]}"#,
        )
        .unwrap();
        let summary = orchestrator(root).run(None).unwrap();
        assert_eq!(summary.strategy, Strategy::Incremental);
        assert_eq!(summary.classification, Some(Classification::Minor));

        let de = fs::read_to_string(root.join("remote/DE.jsonl")).unwrap();
        assert_eq!(de.lines().count(), 2);
    }
}
