//! Read-only view of the persisted sync state.

use crate::checkpoint::CheckpointStore;
use crate::config::SyncConfig;
use crate::detector::MappingChangeDetector;
use crate::error::SyncResult;
use crate::tracker::{TrackerStats, VariantStateTracker};
use feedsync_types::{Checkpoint, CountryCode};
use serde::Serialize;
use std::fmt;

/// The newest mapping snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    /// History sequence number.
    pub sequence: u64,
    /// Unix milliseconds at capture.
    pub captured_at: u64,
    /// Mapped locations.
    pub locations: usize,
    /// Countries served.
    pub countries: Vec<CountryCode>,
    /// Content fingerprint.
    pub fingerprint: String,
}

/// Effective configuration values.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay.
    pub base_retry_delay_ms: u64,
    /// Backoff cap.
    pub max_retry_delay_ms: u64,
    /// Upload concurrency.
    pub max_concurrent_uploads: usize,
    /// Mapping-aware strategy selection.
    pub smart_mapping_enabled: bool,
    /// Countries feeds are published for; all when absent.
    pub target_countries: Option<Vec<CountryCode>>,
}

impl From<&SyncConfig> for ConfigReport {
    fn from(config: &SyncConfig) -> Self {
        let millis = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_retries: config.retry.max_retries,
            base_retry_delay_ms: millis(config.retry.base_delay),
            max_retry_delay_ms: millis(config.retry.max_delay),
            max_concurrent_uploads: config.max_concurrent_uploads,
            smart_mapping_enabled: config.smart_mapping_enabled,
            target_countries: config
                .target_countries
                .as_ref()
                .map(|t| t.iter().cloned().collect()),
        }
    }
}

/// Everything an operator needs to decide between resume, full or clear.
#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    /// The resumable run, if any.
    pub active_run: Option<Checkpoint>,
    /// The run incremental syncs build on.
    pub last_completed: Option<Checkpoint>,
    /// Checkpoints on disk.
    pub stored_runs: usize,
    /// Newest mapping snapshot.
    pub mapping: Option<MappingReport>,
    /// Snapshots in the history.
    pub snapshots: usize,
    /// Snapshot the published feeds reflect.
    pub settled_snapshot: Option<u64>,
    /// Variant tracker summary.
    pub tracker: TrackerStats,
    /// Effective configuration.
    pub config: ConfigReport,
}

impl StateReport {
    /// Reads the report from the stores.
    pub fn collect(
        checkpoints: &dyn CheckpointStore,
        detector: &MappingChangeDetector,
        tracker: &VariantStateTracker,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let runs = checkpoints.list()?;
        let active_run = runs.iter().rev().find(|c| c.run.is_active()).cloned();
        let last_completed = checkpoints.latest_completed()?;
        let mapping = detector.history().latest()?.map(|s| MappingReport {
            sequence: s.sequence(),
            captured_at: s.captured_at(),
            locations: s.entries().len(),
            countries: s.countries().into_iter().collect(),
            fingerprint: s.fingerprint(),
        });

        Ok(Self {
            active_run,
            last_completed,
            stored_runs: runs.len(),
            mapping,
            snapshots: detector.history().len()?,
            settled_snapshot: detector.history().settled_sequence()?,
            tracker: tracker.stats()?,
            config: ConfigReport::from(config),
        })
    }
}

fn write_run(f: &mut fmt::Formatter<'_>, label: &str, checkpoint: &Checkpoint) -> fmt::Result {
    let run = &checkpoint.run;
    writeln!(f, "{label}: {} ({})", run.run_id, run.strategy)?;
    writeln!(f, "  reason:        {}", run.reason)?;
    match run.phase {
        Some(phase) => writeln!(f, "  last phase:    {phase}")?,
        None => writeln!(f, "  last phase:    none")?,
    }
    writeln!(f, "  fetched:       {}", checkpoint.artifacts.fetched)?;
    writeln!(
        f,
        "  exported:      {} feeds",
        checkpoint.artifacts.exported.len()
    )?;
    writeln!(
        f,
        "  uploaded:      {} feeds",
        checkpoint.artifacts.uploaded.len()
    )
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active_run {
            Some(active) => write_run(f, "Active run", active)?,
            None => writeln!(f, "Active run: none")?,
        }
        match &self.last_completed {
            Some(done) => write_run(f, "Last completed run", done)?,
            None => writeln!(f, "Last completed run: none")?,
        }
        writeln!(f, "Stored checkpoints: {}", self.stored_runs)?;

        match &self.mapping {
            Some(m) => {
                writeln!(f, "Mapping snapshot: #{} of {}", m.sequence, self.snapshots)?;
                writeln!(f, "  locations:     {}", m.locations)?;
                let countries: Vec<&str> = m.countries.iter().map(CountryCode::as_str).collect();
                writeln!(f, "  countries:     {}", countries.join(", "))?;
                writeln!(f, "  fingerprint:   {}", m.fingerprint)?;
            }
            None => writeln!(f, "Mapping snapshot: none")?,
        }
        match self.settled_snapshot {
            Some(sequence) => writeln!(f, "Settled snapshot: #{sequence}")?,
            None => writeln!(f, "Settled snapshot: none")?,
        }

        writeln!(f, "Tracked variants: {}", self.tracker.variants)?;
        for (country, count) in &self.tracker.per_country {
            writeln!(f, "  {country}: {count}")?;
        }
        match &self.tracker.baseline {
            Some(b) => writeln!(f, "Baseline: run {} at {}", b.run_id, b.watermark)?,
            None => writeln!(f, "Baseline: none")?,
        }

        let c = &self.config;
        let targets = match &c.target_countries {
            Some(t) => t.iter().map(CountryCode::as_str).collect::<Vec<_>>().join(","),
            None => "all".to_string(),
        };
        writeln!(
            f,
            "Config: retries={} base_delay={}ms max_delay={}ms uploads={} smart_mapping={} targets={}",
            c.max_retries,
            c.base_retry_delay_ms,
            c.max_retry_delay_ms,
            c.max_concurrent_uploads,
            c.smart_mapping_enabled,
            targets
        )
    }
}
