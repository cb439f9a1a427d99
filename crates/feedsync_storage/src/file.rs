//! Directory-based state backend for persistent storage.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/
//! ├─ LOCK                     # Advisory lock for single-process access
//! ├─ checkpoints/<run>.json   # One document per run
//! ├─ mappings/<seq>.json      # Snapshot history
//! ├─ mapping_settled.json     # Snapshot the published feeds reflect
//! ├─ variants.json            # Variant state tracker
//! └─ spool/<run>/<name>       # Spooled intermediate artifacts
//! ```
//!
//! Documents are written with the write-then-rename pattern so a crash
//! never leaves a torn document behind.

use crate::backend::{validate_key, StateBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-based state backend.
///
/// Each key maps to a file below the root directory.
///
/// # Durability
///
/// `write` goes through a temporary sibling file that is fsynced, renamed
/// over the target, and followed by an fsync of the parent directory.
///
/// # Thread Safety
///
/// The backend holds an exclusive advisory lock on `<root>/LOCK` for its
/// whole lifetime, so only one process can use a state directory at a time.
/// Within the process it is `Send + Sync`.
///
/// # Example
///
/// ```no_run
/// use feedsync_storage::{FileBackend, StateBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("state")).unwrap();
/// backend.write("variants.json", b"{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a state directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(root: &Path) -> StorageResult<Self> {
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root.display().to_string()));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the state directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key == LOCK_FILE || key.ends_with(TEMP_SUFFIX) {
                continue;
            }
            out.push(key);
        }
        Ok(())
    }
}

impl StateBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(self.root.as_path()).to_path_buf();
        fs::create_dir_all(&parent)?;

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        sync_directory(&parent)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                sync_directory(path.parent().unwrap_or(self.root.as_path()))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Only the directory named by the prefix can hold matching keys
        let start = match prefix.rfind('/') {
            Some(end) => self.path_for(&prefix[..end])?,
            None => self.root.clone(),
        };
        let mut keys = Vec::new();
        self.collect_keys(&start, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

/// Fsyncs a directory so renames and deletions inside it are durable.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced
    Ok(())
}
