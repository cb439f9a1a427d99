//! Uploader mirroring feeds into a local folder.

use super::{io_error, write_atomic};
use feedsync_engine::{FeedUploader, SyncError, SyncResult};
use feedsync_types::{FileRef, RemoteId};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A folder standing in for the remote store.
///
/// Uploading copies the feed under its file name, overwriting an existing
/// copy; the file name is the remote identifier.
#[derive(Debug, Clone)]
pub struct FolderUploader {
    dir: PathBuf,
}

impl FolderUploader {
    /// Creates an uploader into `dir`, created on first upload.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The folder.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FeedUploader for FolderUploader {
    fn upload(&self, file: &FileRef) -> SyncResult<RemoteId> {
        let source = Path::new(file.as_str());
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::collaborator(format!("{file} has no file name")))?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| io_error(format!("remote folder {}", self.dir.display()), e))?;
        let bytes = fs::read(source).map_err(|e| io_error(format!("upload {file}"), e))?;
        write_atomic(&self.dir.join(name), &bytes)
            .map_err(|e| io_error(format!("upload {file}"), e))?;
        debug!("uploaded {file} ({} bytes)", bytes.len());

        RemoteId::new(name).map_err(|e| SyncError::collaborator(format!("upload {file}: {e}")))
    }

    fn delete_orphans(&self, current: &BTreeSet<RemoteId>) -> SyncResult<usize> {
        let context = format!("remote folder {}", self.dir.display());
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&context, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&context, e))?;
            if !entry.file_type().map_err(|e| io_error(&context, e))?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if current.iter().any(|id| id.as_str() == name) {
                continue;
            }
            fs::remove_file(entry.path()).map_err(|e| io_error(&context, e))?;
            info!("deleted orphaned remote feed {name}");
            removed += 1;
        }
        Ok(removed)
    }
}
