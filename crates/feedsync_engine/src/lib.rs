//! # Feedsync Engine
//!
//! Resumable catalog-to-feed synchronization.
//!
//! This crate provides:
//! - The run orchestrator and its four-phase state machine
//! - Mapping change detection against the last settled snapshot
//! - Per-variant state tracking for incremental runs
//! - Durable checkpoints, retry with exponential backoff and cancellation
//!
//! ## Architecture
//!
//! A run resolves its strategy once, then executes
//! `MAPPING_RESOLVED -> DATA_FETCHED -> FEEDS_EXPORTED -> UPLOAD_COMPLETE`,
//! committing a checkpoint after each phase. An interrupted run resumes
//! from the phase after its last commit with the strategy it started with.
//!
//! External systems (catalog, feed writer, remote storage, mapping source)
//! are reached only through the traits in [`collaborators`]; all state is
//! kept in a [`feedsync_storage::StateBackend`].
//!
//! ## Key Invariants
//!
//! - Phases only advance, one at a time, each after a durable commit
//! - A run never changes strategy after MAPPING_RESOLVED
//! - At most one run is active
//! - The variant tracker and the settled mapping snapshot move only when a
//!   run completes
//! - Only transient network errors are retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod checkpoint;
pub mod collaborators;
mod config;
mod detector;
mod document;
mod error;
mod orchestrator;
mod report;
mod retry;
mod spool;
mod tracker;

pub use cancel::CancelToken;
pub use checkpoint::{BackendCheckpointStore, CheckpointStore};
pub use collaborators::{
    Collaborators, FeedUploader, FeedWriter, MappingSource, ProductSource, VariantStream,
    WriteMode,
};
pub use config::{SyncConfig, MAX_BASE_DELAY, MAX_RETRIES_LIMIT, MAX_UPLOAD_CONCURRENCY};
pub use detector::{Detection, MappingChangeDetector, SnapshotHistory};
pub use error::{SyncError, SyncFailure, SyncResult};
pub use orchestrator::{resolve_strategy, Orchestrator, RunSummary, StrategyDecision};
pub use report::{ConfigReport, MappingReport, StateReport};
pub use retry::RetryPolicy;
pub use spool::ArtifactSpool;
pub use tracker::{Baseline, FilterChanged, TrackerStats, VariantCommit, VariantStateTracker};
