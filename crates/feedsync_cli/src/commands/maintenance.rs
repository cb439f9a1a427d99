//! Maintenance commands: cleanup, refresh-mapping, clear-cache and
//! clear-checkpoint.

use crate::error::{CliError, CliResult};
use feedsync_engine::{Detection, Orchestrator};
use feedsync_types::RunId;

/// Deletes remote feeds not published by the last completed run.
pub fn cleanup(orchestrator: &Orchestrator) -> CliResult<()> {
    let removed = orchestrator.cleanup_orphans()?;
    println!("Removed {removed} orphaned remote feeds");
    Ok(())
}

/// Recaptures the mapping as a fresh baseline.
pub fn refresh_mapping(orchestrator: &Orchestrator) -> CliResult<()> {
    let detection = orchestrator.refresh_mapping()?;
    print!("{}", describe(&detection));
    Ok(())
}

/// Forgets mapping history and variant state.
pub fn clear_cache(orchestrator: &Orchestrator) -> CliResult<()> {
    let snapshots = orchestrator.clear_cache()?;
    println!("Cleared {snapshots} mapping snapshots and the variant state");
    println!("The next smart sync runs FULL");
    Ok(())
}

/// Removes a run's checkpoint, the active run's by default.
pub fn clear_checkpoint(orchestrator: &Orchestrator, run_id: Option<String>) -> CliResult<()> {
    let run_id = run_id
        .map(RunId::new)
        .transpose()
        .map_err(|e| CliError::setting("run id", e.to_string()))?;
    let cleared = orchestrator.clear_checkpoint(run_id.as_ref())?;
    println!("Cleared checkpoint of run {cleared}");
    Ok(())
}

fn describe(detection: &Detection) -> String {
    let snapshot = &detection.current;
    let mut out = format!(
        "Mapping snapshot #{}: {} locations, {} countries\n",
        snapshot.sequence(),
        snapshot.entries().len(),
        snapshot.countries().len()
    );
    out.push_str(&format!("  fingerprint:    {}\n", snapshot.fingerprint()));
    if detection.is_first_capture() {
        out.push_str("  classification: first capture\n");
    } else {
        out.push_str(&format!(
            "  classification: {}\n",
            detection.classification()
        ));
    }
    out
}
