//! Sync run lifecycle: phases, strategies and run status.

use crate::ids::RunId;
use crate::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One step of the run state machine, in execution order.
///
/// The derived ordering follows declaration order, so `a < b` means `a`
/// runs before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Mapping detected and strategy fixed for the run.
    MappingResolved,
    /// Source data fetched and spooled durably.
    DataFetched,
    /// Every country feed written.
    FeedsExported,
    /// Every feed uploaded; terminal.
    UploadComplete,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::MappingResolved,
        Phase::DataFetched,
        Phase::FeedsExported,
        Phase::UploadComplete,
    ];

    /// Returns the phase that follows `completed`, or the first phase when
    /// nothing has completed yet. `None` once the terminal phase is reached.
    #[must_use]
    pub fn next_after(completed: Option<Phase>) -> Option<Phase> {
        match completed {
            None => Some(Phase::MappingResolved),
            Some(Phase::MappingResolved) => Some(Phase::DataFetched),
            Some(Phase::DataFetched) => Some(Phase::FeedsExported),
            Some(Phase::FeedsExported) => Some(Phase::UploadComplete),
            Some(Phase::UploadComplete) => None,
        }
    }

    /// Returns true for the phase that completes a run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Phase::UploadComplete
    }

    /// Short label used in logs and file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::MappingResolved => "mapping_resolved",
            Phase::DataFetched => "data_fetched",
            Phase::FeedsExported => "feeds_exported",
            Phase::UploadComplete => "upload_complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the catalog a run processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Every variant, every country feed rebuilt, orphans dropped.
    Full,
    /// Only variants changed since the last completed run.
    Incremental,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Full => f.write_str("FULL"),
            Strategy::Incremental => f.write_str("INCREMENTAL"),
        }
    }
}

/// Lifecycle state of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Started and not yet finished; resumable.
    Active,
    /// Reached `UploadComplete`.
    Completed,
    /// Superseded by a later FULL run.
    Abandoned,
}

/// Rejected run state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Phases may only advance one step at a time.
    #[error("invalid phase transition from {from:?} to {to}")]
    OutOfOrder {
        /// Last completed phase.
        from: Option<Phase>,
        /// Attempted phase.
        to: Phase,
    },

    /// Only active runs move.
    #[error("run is {0:?}, not active")]
    NotActive(RunStatus),

    /// A run completes only after its terminal phase.
    #[error("run cannot complete before {}", Phase::UploadComplete)]
    Incomplete,
}

/// One execution attempt of the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Identifier created at start.
    pub run_id: RunId,
    /// Strategy fixed at start; never changes afterwards.
    pub strategy: Strategy,
    /// Last phase fully completed.
    pub phase: Option<Phase>,
    /// Lifecycle state.
    pub status: RunStatus,
    /// Why the strategy was chosen.
    pub reason: String,
    /// Unix milliseconds at start.
    pub started_at: u64,
    /// Unix milliseconds at completion.
    pub completed_at: Option<u64>,
}

impl SyncRun {
    /// Starts a new active run.
    #[must_use]
    pub fn start(strategy: Strategy, reason: impl Into<String>) -> Self {
        Self {
            run_id: RunId::generate(),
            strategy,
            phase: None,
            status: RunStatus::Active,
            reason: reason.into(),
            started_at: now_millis(),
            completed_at: None,
        }
    }

    /// Returns the phase this run executes next.
    #[must_use]
    pub fn next_phase(&self) -> Option<Phase> {
        Phase::next_after(self.phase)
    }

    /// Records `phase` as completed. Only the immediate successor of the
    /// current phase is accepted.
    pub fn advance(&mut self, phase: Phase) -> Result<(), TransitionError> {
        if self.status != RunStatus::Active {
            return Err(TransitionError::NotActive(self.status));
        }
        if self.next_phase() != Some(phase) {
            return Err(TransitionError::OutOfOrder {
                from: self.phase,
                to: phase,
            });
        }
        self.phase = Some(phase);
        Ok(())
    }

    /// Marks the run completed.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Active {
            return Err(TransitionError::NotActive(self.status));
        }
        if self.phase != Some(Phase::UploadComplete) {
            return Err(TransitionError::Incomplete);
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(now_millis());
        Ok(())
    }

    /// Marks the run abandoned.
    pub fn abandon(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Active {
            return Err(TransitionError::NotActive(self.status));
        }
        self.status = RunStatus::Abandoned;
        Ok(())
    }

    /// Returns true while the run can still be resumed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Active
    }
}
