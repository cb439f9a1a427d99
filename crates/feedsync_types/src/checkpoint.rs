//! Durable checkpoint records.

use crate::ids::{CountryCode, FileRef, RemoteId, RunId};
use crate::mapping::{Classification, MappingEntries};
use crate::run::{Phase, SyncRun};
use crate::{now_millis, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A feed file written for one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFeed {
    /// Reference returned by the export collaborator.
    pub file: FileRef,
    /// Records written into the file by this run.
    pub records: u64,
}

/// References to the intermediate outputs a run needs to resume.
///
/// Fields are filled in as phases complete. The per-country maps may also
/// grow while a phase is in progress; they only ever describe work whose
/// side effects are already durable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    /// Mapping snapshot the run routes through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_sequence: Option<u64>,
    /// Classification that drove the strategy decision, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Locations whose newly added countries need a re-export.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expansions: MappingEntries,
    /// Baseline watermark for incremental fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Revision>,
    /// Spool holding the fetched records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_spool: Option<String>,
    /// Number of records in the spool.
    #[serde(default)]
    pub fetched: u64,
    /// Feed files already written, by country.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exported: BTreeMap<CountryCode, ExportedFeed>,
    /// Feed files already uploaded, by country.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uploaded: BTreeMap<CountryCode, RemoteId>,
    /// Remote orphans deleted during upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphans_removed: Option<usize>,
    /// Every live remote feed once the run completed. A FULL run publishes
    /// exactly what it uploaded; an INCREMENTAL run overlays its uploads on
    /// the previous run's set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub published: BTreeMap<CountryCode, RemoteId>,
}

/// Durable record of how far one run got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The run, including its last completed phase and status.
    pub run: SyncRun,
    /// Intermediate outputs.
    pub artifacts: ArtifactRefs,
    /// Unix milliseconds of the last commit.
    pub updated_at: u64,
}

impl Checkpoint {
    /// Creates a checkpoint for the run's current state.
    #[must_use]
    pub fn new(run: SyncRun, artifacts: ArtifactRefs) -> Self {
        Self {
            run,
            artifacts,
            updated_at: now_millis(),
        }
    }

    /// Identifier of the run.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run.run_id
    }

    /// Last fully committed phase.
    #[must_use]
    pub fn phase_completed(&self) -> Option<Phase> {
        self.run.phase
    }
}
