//! Sync commands: smart, full, incremental and resume.

use crate::error::CliResult;
use feedsync_engine::{Orchestrator, RunSummary};
use feedsync_types::Strategy;
use std::time::Duration;

/// Which sync the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Let the engine pick from mapping changes and history.
    Smart,
    /// Run with this strategy.
    Forced(Strategy),
    /// Continue the active run.
    Resume,
}

/// Runs the requested sync and prints its summary.
pub fn run(orchestrator: &Orchestrator, request: Request) -> CliResult<()> {
    let summary = match request {
        Request::Smart => orchestrator.run(None)?,
        Request::Forced(strategy) => orchestrator.run(Some(strategy))?,
        Request::Resume => orchestrator.resume()?,
    };
    print!("{}", render(&summary));
    Ok(())
}

fn millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// Text summary of a completed run.
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} sync completed: run {}{}\n",
        summary.strategy,
        summary.run_id,
        if summary.resumed { " (resumed)" } else { "" }
    ));
    out.push_str(&format!("  Reason:          {}\n", summary.reason));
    if let Some(classification) = summary.classification {
        out.push_str(&format!("  Mapping change:  {classification}\n"));
    }
    out.push_str(&format!("  Fetched:         {} variants\n", summary.fetched));
    if summary.exported.is_empty() {
        out.push_str("  Exported:        nothing\n");
    } else {
        let feeds: Vec<String> = summary
            .exported
            .iter()
            .map(|(country, records)| format!("{country} {records}"))
            .collect();
        out.push_str(&format!("  Exported:        {}\n", feeds.join(", ")));
    }
    out.push_str(&format!("  Uploaded:        {} feeds\n", summary.uploaded));
    out.push_str(&format!("  Orphans removed: {}\n", summary.orphans_removed));
    out.push_str(&format!(
        "  Committed:       {} variants\n",
        summary.variants_committed
    ));
    let phases: Vec<String> = summary
        .phase_timings
        .iter()
        .map(|(phase, elapsed)| format!("{phase} {}", millis(*elapsed)))
        .collect();
    out.push_str(&format!(
        "  Duration:        {} ({})\n",
        millis(summary.duration),
        phases.join(", ")
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_types::{Classification, CountryCode, Phase, RunId};
    use std::collections::BTreeMap;

    #[test]
    fn render_lists_feeds_and_phases() {
        let summary = RunSummary {
            run_id: RunId::new("run-1").unwrap(),
            strategy: Strategy::Incremental,
            reason: "mapping unchanged".into(),
            classification: Some(Classification::Unchanged),
            resumed: true,
            fetched: 4,
            exported: BTreeMap::from([
                (CountryCode::new("CA").unwrap(), 1),
                (CountryCode::new("US").unwrap(), 3),
            ]),
            uploaded: 2,
            orphans_removed: 0,
            variants_committed: 4,
            duration: Duration::from_millis(42),
            phase_timings: vec![(Phase::DataFetched, Duration::from_millis(40))],
        };

        let text = render(&summary);
        assert!(text.starts_with("INCREMENTAL sync completed: run run-1 (resumed)"));
        assert!(text.contains("Exported:        CA 1, US 3"));
        assert!(text.contains("42ms (data_fetched 40ms)"));
    }
}
