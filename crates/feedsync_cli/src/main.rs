//! Feedsync CLI
//!
//! Syncs a product catalog into per-country feeds and keeps the uploaded
//! copies current, resuming interrupted runs from their last checkpoint.
//!
//! # Commands
//!
//! - `smart` - Pick FULL or INCREMENTAL from mapping changes and history
//! - `full` / `incremental` - Force a strategy
//! - `resume` - Continue the active run
//! - `debug` - Show checkpoints, mapping and variant state
//! - `cleanup` - Delete remote feeds no longer published
//! - `refresh-mapping` - Recapture the mapping as the comparison base
//! - `clear-cache` - Forget mapping history and variant state
//! - `clear-checkpoint` - Drop a run's checkpoint

mod adapters;
mod commands;
mod error;
mod settings;

use clap::{Parser, Subcommand};
use error::CliResult;
use commands::debug::Format;
use commands::sync::Request;
use feedsync_engine::Orchestrator;
use feedsync_storage::FileBackend;
use feedsync_types::Strategy;
use settings::Settings;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Catalog to country feed synchronization.
#[derive(Parser)]
#[command(name = "feedsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync with the strategy chosen from mapping changes and history
    Smart,

    /// Rebuild every feed from the full catalog
    Full,

    /// Export only variants changed since the last completed sync
    Incremental,

    /// Continue the active run from its last checkpoint
    Resume,

    /// Show sync state for troubleshooting
    Debug {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Delete remote feeds not published by the last completed sync
    Cleanup,

    /// Discard mapping history and capture a fresh snapshot
    RefreshMapping,

    /// Discard mapping history and variant state; the next smart sync is FULL
    ClearCache,

    /// Remove a run's checkpoint (the active run by default)
    ClearCheckpoint {
        /// Run to clear
        run_id: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn execute(cli: Cli) -> CliResult<()> {
    if let Commands::Version = cli.command {
        println!("feedsync v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = cli.settings.sync_config()?;
    let backend = FileBackend::open(&cli.settings.state_dir)?;
    let orchestrator = Orchestrator::new(config, Arc::new(backend), cli.settings.collaborators())?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("interrupt received; stopping at the next checkpoint boundary");
        cancel.cancel();
    });

    let command = cli.command;
    tokio::task::spawn_blocking(move || dispatch(&orchestrator, command)).await?
}

fn dispatch(orchestrator: &Orchestrator, command: Commands) -> CliResult<()> {
    match command {
        Commands::Smart => commands::sync::run(orchestrator, Request::Smart),
        Commands::Full => commands::sync::run(orchestrator, Request::Forced(Strategy::Full)),
        Commands::Incremental => {
            commands::sync::run(orchestrator, Request::Forced(Strategy::Incremental))
        }
        Commands::Resume => commands::sync::run(orchestrator, Request::Resume),
        Commands::Debug { format } => commands::debug::run(orchestrator, format),
        Commands::Cleanup => commands::maintenance::cleanup(orchestrator),
        Commands::RefreshMapping => commands::maintenance::refresh_mapping(orchestrator),
        Commands::ClearCache => commands::maintenance::clear_cache(orchestrator),
        Commands::ClearCheckpoint { run_id } => {
            commands::maintenance::clear_checkpoint(orchestrator, run_id)
        }
        // Answered before the state directory is opened
        Commands::Version => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("unable to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("unable to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn clear_checkpoint_takes_an_optional_run() {
        let cli = Cli::parse_from(["feedsync", "clear-checkpoint", "run-7"]);
        assert!(matches!(
            cli.command,
            Commands::ClearCheckpoint { run_id: Some(ref id) } if id == "run-7"
        ));

        let cli = Cli::parse_from(["feedsync", "--verbose", "clear-checkpoint"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::ClearCheckpoint { run_id: None }));
    }

    #[test]
    fn debug_format_is_checked_by_the_parser() {
        let cli = Cli::parse_from(["feedsync", "debug", "--format", "json"]);
        assert!(matches!(cli.command, Commands::Debug { format: Format::Json }));

        let cli = Cli::parse_from(["feedsync", "debug"]);
        assert!(matches!(cli.command, Commands::Debug { format: Format::Text }));

        let err = Cli::try_parse_from(["feedsync", "debug", "--format", "yaml"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
