//! Durable checkpoint storage.

use crate::document;
use crate::error::{SyncError, SyncResult};
use feedsync_storage::StateBackend;
use feedsync_types::{Checkpoint, Phase, RunId, RunStatus, TransitionError};
use tracing::{debug, warn};

const PREFIX: &str = "checkpoints/";

/// Persists run checkpoints.
///
/// # Invariants
///
/// - `commit` is atomic: after a crash `load` returns either the previous
///   or the new checkpoint
/// - A committed phase never goes backwards for the same run
/// - Corrupted checkpoints are reported, never discarded
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint of one run.
    fn load(&self, run_id: &RunId) -> SyncResult<Option<Checkpoint>>;

    /// Durably records a checkpoint, replacing the previous one for the run.
    fn commit(&self, checkpoint: &Checkpoint) -> SyncResult<()>;

    /// Removes a run's checkpoint. Returns true if one existed.
    fn clear(&self, run_id: &RunId) -> SyncResult<bool>;

    /// Every stored checkpoint, oldest run first.
    fn list(&self) -> SyncResult<Vec<Checkpoint>>;

    /// The active run, if any.
    ///
    /// Should several runs be active (a crash between superseding and
    /// committing), the most recently started one wins.
    fn active(&self) -> SyncResult<Option<Checkpoint>> {
        let mut active: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|c| c.run.status == RunStatus::Active)
            .collect();
        if active.len() > 1 {
            warn!("{} active runs found; using the newest", active.len());
        }
        Ok(active.pop())
    }

    /// The most recently completed run, if any.
    fn latest_completed(&self) -> SyncResult<Option<Checkpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.run.status == RunStatus::Completed)
            .max_by_key(|c| (c.run.completed_at, c.run.started_at)))
    }

    /// Drops finished checkpoints other than `keep`. Returns how many were
    /// removed.
    fn prune_finished(&self, keep: &RunId) -> SyncResult<usize> {
        let mut removed = 0;
        for checkpoint in self.list()? {
            if checkpoint.run.is_active() || checkpoint.run_id() == keep {
                continue;
            }
            if self.clear(checkpoint.run_id())? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// A [`CheckpointStore`] writing one document per run to a state backend.
#[derive(Debug)]
pub struct BackendCheckpointStore<B> {
    backend: B,
}

impl<B: StateBackend> BackendCheckpointStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(run_id: &RunId) -> String {
        format!("{PREFIX}{run_id}.json")
    }
}

impl<B: StateBackend> CheckpointStore for BackendCheckpointStore<B> {
    fn load(&self, run_id: &RunId) -> SyncResult<Option<Checkpoint>> {
        document::load(&self.backend, &Self::key(run_id))
    }

    fn commit(&self, checkpoint: &Checkpoint) -> SyncResult<()> {
        if let Some(stored) = self.load(checkpoint.run_id())? {
            if stored.run.phase > checkpoint.run.phase {
                return Err(SyncError::InvalidPhaseTransition(
                    TransitionError::OutOfOrder {
                        from: stored.run.phase,
                        to: checkpoint.run.phase.unwrap_or(Phase::MappingResolved),
                    },
                ));
            }
            if !stored.run.is_active() && stored.run.status != checkpoint.run.status {
                return Err(SyncError::InvalidPhaseTransition(
                    TransitionError::NotActive(stored.run.status),
                ));
            }
        }
        document::store(&self.backend, &Self::key(checkpoint.run_id()), checkpoint)?;
        debug!(
            "checkpoint committed: run {} phase {:?} status {:?}",
            checkpoint.run_id(),
            checkpoint.run.phase,
            checkpoint.run.status
        );
        Ok(())
    }

    fn clear(&self, run_id: &RunId) -> SyncResult<bool> {
        Ok(self.backend.remove(&Self::key(run_id))?)
    }

    fn list(&self) -> SyncResult<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        for key in self.backend.list(PREFIX)? {
            if !key.ends_with(".json") {
                continue;
            }
            if let Some(checkpoint) = document::load::<Checkpoint, _>(&self.backend, &key)? {
                checkpoints.push(checkpoint);
            }
        }
        checkpoints.sort_by_key(|c| c.run.started_at);
        Ok(checkpoints)
    }
}
