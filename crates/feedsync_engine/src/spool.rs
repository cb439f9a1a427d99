//! Durable spool for intermediate run artifacts.
//!
//! Fetched variants are written here as JSON lines before DATA_FETCHED is
//! committed, so a resumed run never refetches.

use crate::error::{SyncError, SyncResult};
use feedsync_storage::StateBackend;
use feedsync_types::{RunId, SourceVariant};
use std::sync::Arc;

const PREFIX: &str = "spool/";

/// Per-run artifact files.
#[derive(Clone)]
pub struct ArtifactSpool {
    backend: Arc<dyn StateBackend>,
}

impl ArtifactSpool {
    /// Creates a spool stored in `backend`.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    fn run_prefix(run_id: &RunId) -> String {
        format!("{PREFIX}{run_id}/")
    }

    /// Writes `variants` under `name` for the run and returns the key.
    pub fn write_variants(
        &self,
        run_id: &RunId,
        name: &str,
        variants: &[SourceVariant],
    ) -> SyncResult<String> {
        let key = format!("{}{name}.jsonl", Self::run_prefix(run_id));
        let mut buf = Vec::new();
        for variant in variants {
            serde_json::to_writer(&mut buf, variant).map_err(|e| {
                SyncError::collaborator(format!("cannot serialize {}: {e}", variant.variant_id))
            })?;
            buf.push(b'\n');
        }
        self.backend.write(&key, &buf)?;
        Ok(key)
    }

    /// Reads back a spool written by [`ArtifactSpool::write_variants`].
    pub fn read_variants(&self, key: &str) -> SyncResult<Vec<SourceVariant>> {
        let bytes = self
            .backend
            .read(key)?
            .ok_or_else(|| SyncError::corruption(key, "spooled artifact is missing"))?;
        bytes
            .split(|b| *b == b'\n')
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(n, line)| {
                serde_json::from_slice(line)
                    .map_err(|e| SyncError::corruption(key, format!("line {}: {e}", n + 1)))
            })
            .collect()
    }

    /// Deletes every artifact of a run. Returns how many were removed.
    pub fn remove_run(&self, run_id: &RunId) -> SyncResult<usize> {
        let mut removed = 0;
        for key in self.backend.list(&Self::run_prefix(run_id))? {
            if self.backend.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_storage::InMemoryBackend;
    use feedsync_types::{LocationId, Revision, VariantId};

    fn variant(id: &str, revision: u64) -> SourceVariant {
        SourceVariant {
            variant_id: VariantId::new(id).unwrap(),
            revision: Revision(revision),
            location_ids: [LocationId::new("loc1").unwrap()].into_iter().collect(),
            attributes: serde_json::json!({"title": format!("Item {id}")}),
        }
    }

    #[test]
    fn spool_preserves_variants() {
        let spool = ArtifactSpool::new(Arc::new(InMemoryBackend::new()));
        let run = RunId::generate();
        let variants = vec![variant("a", 1), variant("b", 2)];

        let key = spool.write_variants(&run, "fetched", &variants).unwrap();
        assert_eq!(key, format!("spool/{run}/fetched.jsonl"));
        assert_eq!(spool.read_variants(&key).unwrap(), variants);
    }

    #[test]
    fn empty_spool_reads_empty() {
        let spool = ArtifactSpool::new(Arc::new(InMemoryBackend::new()));
        let key = spool
            .write_variants(&RunId::generate(), "fetched", &[])
            .unwrap();
        assert!(spool.read_variants(&key).unwrap().is_empty());
    }

    #[test]
    fn damaged_spool_is_corruption() {
        let backend = Arc::new(InMemoryBackend::new());
        let spool = ArtifactSpool::new(backend.clone());
        let key = spool
            .write_variants(&RunId::generate(), "fetched", &[variant("a", 1)])
            .unwrap();
        backend.write(&key, b"{\"variant_id\":").unwrap();

        assert!(matches!(
            spool.read_variants(&key),
            Err(SyncError::CheckpointCorruption { .. })
        ));
        assert!(matches!(
            spool.read_variants("spool/none/fetched.jsonl"),
            Err(SyncError::CheckpointCorruption { .. })
        ));
    }

    #[test]
    fn remove_run_only_touches_that_run() {
        let spool = ArtifactSpool::new(Arc::new(InMemoryBackend::new()));
        let one = RunId::generate();
        let two = RunId::generate();
        let kept = spool.write_variants(&two, "fetched", &[variant("b", 1)]).unwrap();
        spool.write_variants(&one, "fetched", &[variant("a", 1)]).unwrap();

        assert_eq!(spool.remove_run(&one).unwrap(), 1);
        assert_eq!(spool.read_variants(&kept).unwrap().len(), 1);
    }
}
