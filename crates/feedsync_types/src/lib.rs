//! # Feedsync Types
//!
//! Data model for the feedsync catalog-to-feed synchronizer.
//!
//! This crate provides:
//! - `SyncRun`, `Phase` and `Strategy` for the run state machine
//! - `MappingSnapshot` and `MappingDiff` for location to country routing
//! - `VariantRecord`, `SourceVariant` and `FeedRecord`
//! - `Checkpoint` and `ArtifactRefs` for resumable runs
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod ids;
mod mapping;
mod run;
mod variant;

pub use checkpoint::{ArtifactRefs, Checkpoint, ExportedFeed};
pub use ids::{CountryCode, FileRef, IdError, LocationId, RemoteId, Revision, RunId, VariantId};
pub use mapping::{
    Classification, CountrySet, LocationChange, MappingDiff, MappingEntries, MappingSnapshot,
};
pub use run::{Phase, RunStatus, Strategy, SyncRun, TransitionError};
pub use variant::{FeedRecord, SourceVariant, VariantRecord};

/// Current wall clock as Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
