//! Error types for the sync engine.

use feedsync_storage::StorageError;
use feedsync_types::{Phase, RunId, Strategy, TransitionError};
use std::fmt;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the engine and its collaborators.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Temporary network or rate-limit condition. The only retryable kind.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Credentials rejected by a remote service.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Incremental sync requested without a completed baseline.
    #[error("no completed sync to increment from; run a full sync first")]
    NoBaseline,

    /// A retryable operation kept failing.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: Box<SyncError>,
    },

    /// A persisted document could not be parsed or failed its digest.
    #[error("corrupted state document {key}: {message}")]
    CheckpointCorruption {
        /// Storage key of the document.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// Another run is still active.
    #[error("run {run_id} is still active; resume it or clear its checkpoint")]
    ActiveRunConflict {
        /// The active run.
        run_id: RunId,
    },

    /// Resume requested with nothing to resume.
    #[error("no active run to resume")]
    NoActiveRun,

    /// A checkpoint was requested for a run that has none.
    #[error("no checkpoint for run {0}")]
    UnknownRun(RunId),

    /// This orchestrator is already executing a run.
    #[error("a sync run is already in progress")]
    Busy,

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A collaborator failed in a way that is not worth retrying.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Configuration values out of range.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// Run state machine violation.
    #[error(transparent)]
    InvalidPhaseTransition(#[from] TransitionError),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Creates a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork(message.into())
    }

    /// Creates a non-retryable collaborator error.
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }

    pub(crate) fn corruption(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::CheckpointCorruption {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Returns true if the run stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// A failed run, with enough context to decide what to do next.
///
/// `last_completed` is the phase a resume would continue after; `None`
/// means nothing was committed for the run.
#[derive(Debug)]
pub struct SyncFailure {
    /// Run that failed, if one had been started.
    pub run_id: Option<RunId>,
    /// Strategy of the run, if it had been resolved.
    pub strategy: Option<Strategy>,
    /// Last committed phase.
    pub last_completed: Option<Phase>,
    /// Underlying cause.
    pub error: SyncError,
}

impl SyncFailure {
    /// A failure that happened before any run existed.
    pub fn before_run(error: SyncError) -> Self {
        Self {
            run_id: None,
            strategy: None,
            last_completed: None,
            error,
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.run_id, self.strategy) {
            (Some(run_id), Some(strategy)) => {
                write!(f, "{strategy} sync {run_id} failed ")?;
            }
            (Some(run_id), None) => write!(f, "sync {run_id} failed ")?,
            (None, Some(strategy)) => write!(f, "{strategy} sync failed ")?,
            (None, None) => f.write_str("sync failed ")?,
        }
        match self.last_completed {
            Some(phase) => write!(f, "after {phase}: {}", self.error),
            None => write!(f, "before any phase completed: {}", self.error),
        }
    }
}

impl std::error::Error for SyncFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<SyncError> for SyncFailure {
    fn from(error: SyncError) -> Self {
        Self::before_run(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(SyncError::transient("503").is_retryable());
        assert!(!SyncError::Authorization("bad token".into()).is_retryable());
        assert!(!SyncError::NoBaseline.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::collaborator("disk full").is_retryable());
    }

    #[test]
    fn retry_exhausted_keeps_last_error() {
        let err = SyncError::RetryExhausted {
            attempts: 4,
            last: Box::new(SyncError::transient("timeout")),
        };
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.source().unwrap().to_string().contains("timeout"));
    }

    #[test]
    fn failure_display_names_phase_and_run() {
        let failure = SyncFailure {
            run_id: Some(RunId::new("run-7").unwrap()),
            strategy: Some(Strategy::Incremental),
            last_completed: Some(Phase::DataFetched),
            error: SyncError::transient("reset"),
        };
        let text = failure.to_string();
        assert!(text.contains("INCREMENTAL"));
        assert!(text.contains("run-7"));
        assert!(text.contains("data_fetched"));
        assert!(failure.source().is_some());
    }

    #[test]
    fn failure_before_run() {
        let failure = SyncFailure::from(SyncError::NoBaseline);
        assert!(failure.to_string().starts_with("sync failed before any phase"));
    }

    #[test]
    fn invalid_config_lists_problems() {
        let err = SyncError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "invalid configuration: a; b");
    }
}
