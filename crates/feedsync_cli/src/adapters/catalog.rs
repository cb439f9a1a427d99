//! Product source over a JSON-lines catalog export.

use super::io_error;
use feedsync_engine::{ProductSource, SyncError, SyncResult, VariantStream};
use feedsync_types::{Revision, SourceVariant};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Reads one [`SourceVariant`] per line from a file.
///
/// Blank lines are skipped. The file is reopened on every fetch, so a retry
/// sees the export as it is at that moment.
#[derive(Debug, Clone)]
pub struct JsonlCatalog {
    path: PathBuf,
}

impl JsonlCatalog {
    /// Creates a catalog reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The catalog file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProductSource for JsonlCatalog {
    fn stream_products(&self, since: Option<Revision>) -> SyncResult<VariantStream> {
        let file = File::open(&self.path)
            .map_err(|e| io_error(format!("catalog {}", self.path.display()), e))?;
        let path = self.path.display().to_string();

        let variants = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(n, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(io_error(format!("catalog {path}"), e))),
                };
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<SourceVariant>(&line) {
                    Ok(variant) if since.map_or(true, |since| variant.revision > since) => {
                        Some(Ok(variant))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(SyncError::collaborator(format!(
                        "catalog {path} line {}: {e}",
                        n + 1
                    )))),
                }
            });
        Ok(Box::new(variants))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CATALOG: &str = r#"{"variant_id":"v1","revision":3,"location_ids":["loc1"],"attributes":{"title":"Mug"}}

{"variant_id":"v2","revision":7,"location_ids":["loc1","loc2"],"attributes":{"title":"Cap"}}
"#;

    #[test]
    fn streams_variants_newer_than_since() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.jsonl");
        fs::write(&path, CATALOG).unwrap();
        let catalog = JsonlCatalog::new(&path);

        let all: Vec<_> = catalog
            .stream_products(None)
            .unwrap()
            .collect::<SyncResult<_>>()
            .unwrap();
        assert_eq!(all.len(), 2);

        let newer: Vec<SourceVariant> = catalog
            .stream_products(Some(Revision(3)))
            .unwrap()
            .collect::<SyncResult<_>>()
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].variant_id.as_str(), "v2");
    }

    #[test]
    fn reports_bad_lines_with_their_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.jsonl");
        fs::write(&path, "{\"variant_id\":\"v1\"}\n").unwrap();

        let err = JsonlCatalog::new(&path)
            .stream_products(None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_catalog_is_an_error() {
        let dir = tempdir().unwrap();
        let result = JsonlCatalog::new(dir.path().join("absent.jsonl")).stream_products(None);
        assert!(matches!(result, Err(SyncError::Collaborator(_))));
    }
}
