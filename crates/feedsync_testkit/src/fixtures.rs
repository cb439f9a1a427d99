//! Test fixtures and orchestrator harness.
//!
//! Provides short constructors for domain values and a [`Harness`] that
//! wires an orchestrator to the fakes over an in-memory or on-disk state
//! backend.

use crate::fakes::{FakeCatalog, FakeFeedWriter, FakeMapping, FakeUploader};
use feedsync_engine::{
    BackendCheckpointStore, CheckpointStore, Collaborators, Orchestrator, RetryPolicy, SyncConfig,
};
use feedsync_storage::{FileBackend, InMemoryBackend, StateBackend};
use feedsync_types::{CountryCode, CountrySet, LocationId, MappingEntries, Revision, SourceVariant, VariantId};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Parses a country code.
pub fn country(code: &str) -> CountryCode {
    CountryCode::new(code).expect("valid country code")
}

/// Parses a set of country codes.
pub fn countries(codes: &[&str]) -> CountrySet {
    codes.iter().map(|c| country(c)).collect()
}

/// Wraps a location identifier.
pub fn location(id: &str) -> LocationId {
    LocationId::new(id).expect("valid location id")
}

/// Wraps a variant identifier.
pub fn variant_id(id: &str) -> VariantId {
    VariantId::new(id).expect("valid variant id")
}

/// Builds a mapping from `(location, countries)` pairs.
pub fn mapping(pairs: &[(&str, &[&str])]) -> MappingEntries {
    pairs
        .iter()
        .map(|(loc, codes)| (location(loc), countries(codes)))
        .collect()
}

/// Builds a source variant stocked at `locations`.
pub fn variant(id: &str, revision: u64, locations: &[&str]) -> SourceVariant {
    SourceVariant {
        variant_id: variant_id(id),
        revision: Revision(revision),
        location_ids: locations.iter().map(|l| location(l)).collect(),
        attributes: serde_json::json!({ "title": format!("Product {id}") }),
    }
}

/// Configuration with millisecond backoff and no jitter.
pub fn fast_config() -> SyncConfig {
    SyncConfig::new().with_retry(RetryPolicy::new(3, Duration::from_millis(5)).without_jitter())
}

/// An orchestrator's environment: state backend plus scripted collaborators.
///
/// Every call to [`Harness::orchestrator`] builds a fresh orchestrator over
/// the same state, which is how tests simulate a process restart.
pub struct Harness {
    /// Persistent state.
    pub backend: Arc<dyn StateBackend>,
    /// Storefront catalog.
    pub catalog: Arc<FakeCatalog>,
    /// Feed writer.
    pub feeds: Arc<FakeFeedWriter>,
    /// Remote folder.
    pub uploads: Arc<FakeUploader>,
    /// Mapping source.
    pub mapping: Arc<FakeMapping>,
    /// Configuration for new orchestrators.
    pub config: SyncConfig,
    temp_dir: Option<TempDir>,
}

impl Harness {
    /// A harness over an in-memory backend.
    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()), None)
    }

    /// A harness over a file backend in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open(temp_dir.path()).expect("Failed to open state directory");
        Self::with_backend(Arc::new(backend), Some(temp_dir))
    }

    fn with_backend(backend: Arc<dyn StateBackend>, temp_dir: Option<TempDir>) -> Self {
        Self {
            backend,
            catalog: Arc::new(FakeCatalog::new()),
            feeds: Arc::new(FakeFeedWriter::new()),
            uploads: Arc::new(FakeUploader::new()),
            mapping: Arc::new(FakeMapping::default()),
            config: fast_config(),
            temp_dir,
        }
    }

    /// Replaces the configuration used for new orchestrators.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Seeds the catalog and the mapping.
    pub fn seeded(self, variants: Vec<SourceVariant>, entries: MappingEntries) -> Self {
        for variant in variants {
            self.catalog.upsert(variant);
        }
        self.mapping.set(entries);
        self
    }

    /// Reopens the on-disk state directory, as a restarted process would.
    ///
    /// Every orchestrator built from this harness must be dropped first,
    /// since they hold the directory lock.
    pub fn reopen(mut self) -> Self {
        if let Some(dir) = &self.temp_dir {
            let path = dir.path().to_path_buf();
            // Drop the old handle first so its lock is released
            self.backend = Arc::new(InMemoryBackend::new());
            self.backend =
                Arc::new(FileBackend::open(&path).expect("Failed to reopen state directory"));
        }
        self
    }

    /// The collaborators, as handed to orchestrators.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            products: self.catalog.clone(),
            feeds: self.feeds.clone(),
            uploads: self.uploads.clone(),
            mapping: self.mapping.clone(),
        }
    }

    /// A checkpoint store over the harness state.
    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        Arc::new(BackendCheckpointStore::new(self.backend.clone()))
    }

    /// Builds an orchestrator over the harness state.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.config.clone(), self.backend.clone(), self.collaborators())
            .expect("Failed to build orchestrator")
    }

    /// Builds an orchestrator with a custom checkpoint store.
    pub fn orchestrator_with_store(&self, store: Arc<dyn CheckpointStore>) -> Orchestrator {
        self.orchestrator().with_checkpoint_store(store)
    }
}
