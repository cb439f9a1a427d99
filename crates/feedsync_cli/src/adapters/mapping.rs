//! Mapping source over a JSON file.

use super::io_error;
use feedsync_engine::{MappingSource, SyncError, SyncResult};
use feedsync_types::{CountrySet, LocationId, MappingEntries};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One location's entry: a bare list of country codes, or an object with
/// a `countries` list (other keys such as `name` are ignored).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationEntry {
    Countries(CountrySet),
    Described { countries: CountrySet },
}

impl LocationEntry {
    fn into_countries(self) -> CountrySet {
        match self {
            LocationEntry::Countries(countries) => countries,
            LocationEntry::Described { countries, .. } => countries,
        }
    }
}

/// Reads the location to country mapping from a JSON object keyed by
/// location id:
///
/// ```json
/// { "loc1": ["US", "CA"], "loc2": { "name": "Berlin", "countries": ["DE"] } }
/// ```
#[derive(Debug, Clone)]
pub struct MappingFile {
    path: PathBuf,
}

impl MappingFile {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The mapping file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingSource for MappingFile {
    fn fetch_mapping(&self) -> SyncResult<MappingEntries> {
        let context = format!("mapping {}", self.path.display());
        let bytes = fs::read(&self.path).map_err(|e| io_error(&context, e))?;
        let raw: BTreeMap<String, LocationEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::collaborator(format!("{context}: {e}")))?;

        raw.into_iter()
            .map(|(location, entry)| {
                let location = LocationId::new(location)
                    .map_err(|e| SyncError::collaborator(format!("{context}: {e}")))?;
                Ok((location, entry.into_countries()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_types::CountryCode;
    use tempfile::tempdir;

    #[test]
    fn reads_both_entry_shapes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        fs::write(
            &path,
            r#"{"loc1": ["us", "CA"], "loc2": {"name": "Berlin", "countries": ["DE"]}}"#,
        )
        .unwrap();

        let entries = MappingFile::new(&path).fetch_mapping().unwrap();

        let loc1 = &entries[&LocationId::new("loc1").unwrap()];
        assert!(loc1.contains(&CountryCode::new("US").unwrap()));
        assert_eq!(loc1.len(), 2);
        assert_eq!(entries[&LocationId::new("loc2").unwrap()].len(), 1);
    }

    #[test]
    fn rejects_invalid_country_codes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        fs::write(&path, r#"{"loc1": ["USA"]}"#).unwrap();

        let err = MappingFile::new(&path).fetch_mapping().unwrap_err();
        assert!(matches!(err, SyncError::Collaborator(_)));
    }
}
