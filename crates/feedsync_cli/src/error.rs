//! CLI error type and exit codes.

use feedsync_engine::{SyncError, SyncFailure};
use feedsync_storage::StorageError;
use thiserror::Error;

/// Exit code of an interrupted command, as shells report SIGINT.
pub const EXIT_CANCELLED: u8 = 130;

/// Errors surfaced by a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// A sync run failed.
    #[error(transparent)]
    Run(#[from] SyncFailure),

    /// A maintenance operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The state directory could not be opened.
    #[error("cannot open state directory: {0}")]
    Storage(#[from] StorageError),

    /// A command-line setting is unusable.
    #[error("invalid {name}: {message}")]
    Setting {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Output could not be rendered.
    #[error("cannot render output: {0}")]
    Output(#[from] serde_json::Error),

    /// The worker running the command stopped unexpectedly.
    #[error("command worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl CliError {
    pub(crate) fn setting(name: &'static str, message: impl Into<String>) -> Self {
        Self::Setting {
            name,
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        let cancelled = match self {
            CliError::Run(failure) => failure.error.is_cancelled(),
            CliError::Sync(error) => error.is_cancelled(),
            _ => false,
        };
        if cancelled {
            EXIT_CANCELLED
        } else {
            1
        }
    }
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_exits_with_130() {
        let failure = SyncFailure::before_run(SyncError::Cancelled);
        assert_eq!(CliError::from(failure).exit_code(), EXIT_CANCELLED);
        assert_eq!(CliError::from(SyncError::Cancelled).exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn other_failures_exit_with_1() {
        let failure = SyncFailure::before_run(SyncError::NoBaseline);
        assert_eq!(CliError::from(failure).exit_code(), 1);
        assert_eq!(CliError::setting("max retries", "too many").exit_code(), 1);
    }
}
