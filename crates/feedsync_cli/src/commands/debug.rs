//! Debug command implementation.

use crate::error::CliResult;
use clap::ValueEnum;
use feedsync_engine::Orchestrator;

/// Output format of the state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed json
    Json,
}

/// Prints the state report.
pub fn run(orchestrator: &Orchestrator, format: Format) -> CliResult<()> {
    let report = orchestrator.report()?;
    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Format::Text => {
            println!("Feedsync State");
            println!("==============");
            println!();
            print!("{report}");
        }
    }
    Ok(())
}
