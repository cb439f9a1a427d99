//! Interfaces to the external systems a sync run drives.
//!
//! The orchestrator only sees these traits. Implementations report
//! temporary conditions (timeouts, rate limits, 5xx) as
//! [`SyncError::TransientNetwork`](crate::SyncError::TransientNetwork) so
//! the engine retries them, and everything else as a permanent error.

use crate::error::SyncResult;
use feedsync_types::{
    CountryCode, FeedRecord, FileRef, MappingEntries, RemoteId, Revision, SourceVariant,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Lazily produced source variants.
pub type VariantStream = Box<dyn Iterator<Item = SyncResult<SourceVariant>> + Send>;

/// Storefront catalog access.
pub trait ProductSource: Send + Sync {
    /// Streams variants changed after `since`, or the whole catalog when
    /// `since` is `None`.
    ///
    /// Each call starts from the beginning; a failed stream is retried by
    /// calling again.
    fn stream_products(&self, since: Option<Revision>) -> SyncResult<VariantStream>;
}

/// How a country feed file is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Rewrite the feed from the given records only.
    Replace,
    /// Upsert the given records into the existing feed.
    Merge,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Replace => f.write_str("replace"),
            WriteMode::Merge => f.write_str("merge"),
        }
    }
}

/// Writes per-country feed files.
pub trait FeedWriter: Send + Sync {
    /// Writes the feed for `country` and returns a reference to the file.
    ///
    /// Must be idempotent: writing the same records twice yields the same
    /// file.
    fn write_country_feed(
        &self,
        country: &CountryCode,
        records: &[FeedRecord],
        mode: WriteMode,
    ) -> SyncResult<FileRef>;
}

/// Publishes feed files to remote storage.
pub trait FeedUploader: Send + Sync {
    /// Uploads (or replaces) a feed file and returns its remote identifier.
    fn upload(&self, file: &FileRef) -> SyncResult<RemoteId>;

    /// Deletes every remote feed not in `current`. Returns how many were
    /// deleted.
    fn delete_orphans(&self, current: &BTreeSet<RemoteId>) -> SyncResult<usize>;
}

/// Source of the location to country assignment.
pub trait MappingSource: Send + Sync {
    /// Fetches the current assignment.
    fn fetch_mapping(&self) -> SyncResult<MappingEntries>;
}

/// The external systems one orchestrator works against.
#[derive(Clone)]
pub struct Collaborators {
    /// Catalog fetch.
    pub products: Arc<dyn ProductSource>,
    /// Feed export.
    pub feeds: Arc<dyn FeedWriter>,
    /// Remote publication.
    pub uploads: Arc<dyn FeedUploader>,
    /// Location mapping.
    pub mapping: Arc<dyn MappingSource>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
