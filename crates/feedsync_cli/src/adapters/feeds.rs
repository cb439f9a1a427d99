//! Feed writer producing one JSON-lines file per country.

use super::{io_error, write_atomic};
use feedsync_engine::{FeedWriter, SyncError, SyncResult, WriteMode};
use feedsync_types::{CountryCode, CountrySet, FeedRecord, FileRef, Revision, VariantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One row of a country feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FeedLine {
    variant_id: VariantId,
    revision: Revision,
    countries: CountrySet,
    #[serde(default)]
    attributes: serde_json::Value,
}

impl From<&FeedRecord> for FeedLine {
    fn from(record: &FeedRecord) -> Self {
        Self {
            variant_id: record.variant.variant_id.clone(),
            revision: record.variant.revision,
            countries: record.countries.clone(),
            attributes: record.variant.attributes.clone(),
        }
    }
}

/// Writes `<dir>/<COUNTRY>.jsonl`, rows sorted by variant id.
///
/// `Replace` rewrites the file from the given records. `Merge` upserts them
/// into the rows already there. Files are replaced atomically either way.
#[derive(Debug, Clone)]
pub struct DirectoryFeedWriter {
    dir: PathBuf,
}

impl DirectoryFeedWriter {
    /// Creates a writer into `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a country's feed.
    pub fn feed_path(&self, country: &CountryCode) -> PathBuf {
        self.dir.join(format!("{country}.jsonl"))
    }

    fn read_rows(path: &Path) -> SyncResult<BTreeMap<VariantId, FeedLine>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(format!("feed {}", path.display()), e)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let row: FeedLine = serde_json::from_str(line).map_err(|e| {
                    SyncError::collaborator(format!("feed {}: {e}", path.display()))
                })?;
                Ok((row.variant_id.clone(), row))
            })
            .collect()
    }
}

impl FeedWriter for DirectoryFeedWriter {
    fn write_country_feed(
        &self,
        country: &CountryCode,
        records: &[FeedRecord],
        mode: WriteMode,
    ) -> SyncResult<FileRef> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| io_error(format!("feed directory {}", self.dir.display()), e))?;
        let path = self.feed_path(country);

        let mut rows = match mode {
            WriteMode::Replace => BTreeMap::new(),
            WriteMode::Merge => Self::read_rows(&path)?,
        };
        for record in records {
            let row = FeedLine::from(record);
            rows.insert(row.variant_id.clone(), row);
        }

        let mut buf = Vec::new();
        for row in rows.values() {
            serde_json::to_writer(&mut buf, row).map_err(|e| {
                SyncError::collaborator(format!("cannot render {}: {e}", row.variant_id))
            })?;
            buf.push(b'\n');
        }
        write_atomic(&path, &buf).map_err(|e| io_error(format!("feed {}", path.display()), e))?;
        debug!("{} ({mode}): {} rows", path.display(), rows.len());

        FileRef::new(path.display().to_string())
            .map_err(|e| SyncError::collaborator(format!("feed {}: {e}", path.display())))
    }
}
