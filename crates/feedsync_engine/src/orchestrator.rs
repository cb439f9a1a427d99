//! Run orchestration.
//!
//! A run moves through four phases and commits a checkpoint after each:
//!
//! ```text
//! MAPPING_RESOLVED -> DATA_FETCHED -> FEEDS_EXPORTED -> UPLOAD_COMPLETE
//! ```
//!
//! Export and upload also commit per-country progress, so a resumed run
//! skips countries whose side effects are already durable. The variant
//! state tracker is written only once the terminal phase is committed.

use crate::cancel::CancelToken;
use crate::checkpoint::{BackendCheckpointStore, CheckpointStore};
use crate::collaborators::{Collaborators, WriteMode};
use crate::config::SyncConfig;
use crate::detector::{Detection, MappingChangeDetector, SnapshotHistory};
use crate::error::{SyncError, SyncFailure, SyncResult};
use crate::report::StateReport;
use crate::spool::ArtifactSpool;
use crate::tracker::{VariantCommit, VariantStateTracker};
use feedsync_storage::StateBackend;
use feedsync_types::{
    now_millis, ArtifactRefs, Checkpoint, Classification, CountryCode, ExportedFeed, FeedRecord,
    FileRef, LocationId, Phase, RemoteId, Revision, RunId, SourceVariant, Strategy, SyncRun,
    VariantId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FETCH_SPOOL: &str = "fetched";
/// Mapping snapshots kept by housekeeping, the settled one aside.
const SNAPSHOTS_KEPT: usize = 10;

/// Strategy chosen for a new run and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    /// The strategy.
    pub strategy: Strategy,
    /// Human-readable reason, stored on the run.
    pub reason: String,
}

/// Chooses the strategy for a new run.
///
/// A forced strategy wins. Otherwise the choice is smart: FULL without a
/// completed baseline, without a settled mapping snapshot and on MAJOR
/// changes; INCREMENTAL otherwise. With mapping detection disabled the
/// classification is ignored.
pub fn resolve_strategy(
    forced: Option<Strategy>,
    detection: &Detection,
    has_baseline: bool,
    smart_mapping: bool,
) -> SyncResult<StrategyDecision> {
    let (strategy, reason) = match forced {
        Some(Strategy::Full) => (Strategy::Full, "full sync requested".to_string()),
        Some(Strategy::Incremental) if !has_baseline => return Err(SyncError::NoBaseline),
        Some(Strategy::Incremental) => (
            Strategy::Incremental,
            "incremental sync requested".to_string(),
        ),
        None if !has_baseline => (
            Strategy::Full,
            "no completed sync to build on".to_string(),
        ),
        None if detection.is_first_capture() => (
            Strategy::Full,
            "no settled mapping snapshot to compare against".to_string(),
        ),
        None if !smart_mapping => (
            Strategy::Incremental,
            "mapping detection disabled".to_string(),
        ),
        None => match detection.classification() {
            Classification::Unchanged => (Strategy::Incremental, "mapping unchanged".to_string()),
            Classification::Minor => (
                Strategy::Incremental,
                format!(
                    "mapping gained countries at {} locations",
                    detection.diff.expansions().len()
                ),
            ),
            Classification::Major => (
                Strategy::Full,
                format!(
                    "mapping lost or reassigned countries at {} locations",
                    detection.diff.touched()
                ),
            ),
        },
    };
    Ok(StrategyDecision { strategy, reason })
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The run.
    pub run_id: RunId,
    /// Its strategy.
    pub strategy: Strategy,
    /// Why the strategy was chosen.
    pub reason: String,
    /// Mapping classification at start, when there was something to
    /// compare against.
    pub classification: Option<Classification>,
    /// True when this call continued an earlier, interrupted run.
    pub resumed: bool,
    /// Variants fetched.
    pub fetched: u64,
    /// Records exported per country.
    pub exported: BTreeMap<CountryCode, u64>,
    /// Feeds uploaded.
    pub uploaded: usize,
    /// Remote orphans deleted (FULL runs only).
    pub orphans_removed: usize,
    /// Variants whose state was committed to the tracker.
    pub variants_committed: usize,
    /// Wall time of this call.
    pub duration: Duration,
    /// Wall time of each phase executed by this call.
    pub phase_timings: Vec<(Phase, Duration)>,
}

/// Records selected for export, grouped by country.
struct ExportPlan {
    feeds: BTreeMap<CountryCode, Vec<FeedRecord>>,
    commits: Vec<VariantCommit>,
    watermark: Revision,
}

/// Marks the orchestrator busy for the lifetime of the guard.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives sync runs against a set of collaborators.
///
/// # Thread Safety
///
/// The orchestrator is `Send + Sync`. Only one run executes at a time per
/// orchestrator; a concurrent call fails with [`SyncError::Busy`].
/// Cross-process exclusion comes from the state backend.
pub struct Orchestrator {
    config: SyncConfig,
    collaborators: Collaborators,
    checkpoints: Arc<dyn CheckpointStore>,
    detector: MappingChangeDetector,
    tracker: VariantStateTracker,
    spool: ArtifactSpool,
    cancel: CancelToken,
    running: AtomicBool,
}

impl Orchestrator {
    /// Creates an orchestrator keeping all state in `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn StateBackend>,
        collaborators: Collaborators,
    ) -> SyncResult<Self> {
        config.validate()?;
        let cancel = CancelToken::new();
        let detector = MappingChangeDetector::new(
            collaborators.mapping.clone(),
            SnapshotHistory::new(backend.clone()),
            config.retry.clone(),
            cancel.clone(),
        )
        .with_target_countries(config.target_countries.clone());
        Ok(Self {
            checkpoints: Arc::new(BackendCheckpointStore::new(backend.clone())),
            tracker: VariantStateTracker::new(backend.clone()),
            spool: ArtifactSpool::new(backend),
            detector,
            config,
            collaborators,
            cancel,
            running: AtomicBool::new(false),
        })
    }

    /// Replaces the checkpoint store.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Handle for cancelling the current or next run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The checkpoint store.
    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    /// The variant state tracker.
    pub fn tracker(&self) -> &VariantStateTracker {
        &self.tracker
    }

    /// The mapping change detector.
    pub fn detector(&self) -> &MappingChangeDetector {
        &self.detector
    }

    /// Runs a sync, smart unless a strategy is forced.
    ///
    /// With an active run present, a smart sync resumes it, forced
    /// incremental refuses with [`SyncError::ActiveRunConflict`] and forced
    /// full abandons it and starts over.
    pub fn run(&self, forced: Option<Strategy>) -> Result<RunSummary, SyncFailure> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started = Instant::now();

        let superseded = match self.checkpoints.active()? {
            Some(active) => match forced {
                None => {
                    info!(
                        "active {} run {} found; resuming it",
                        active.run.strategy,
                        active.run_id()
                    );
                    return self.drive(active, true, started, Vec::new());
                }
                Some(Strategy::Incremental) => {
                    return Err(SyncError::ActiveRunConflict {
                        run_id: active.run.run_id,
                    }
                    .into());
                }
                Some(Strategy::Full) => Some(active),
            },
            None => None,
        };

        match forced {
            Some(strategy) => info!("starting {strategy} sync"),
            None => info!("starting smart sync"),
        }
        let checkpoint = self
            .begin(forced, superseded)
            .map_err(|error| SyncFailure {
                run_id: None,
                strategy: forced,
                last_completed: None,
                error,
            })?;
        let timings = vec![(Phase::MappingResolved, started.elapsed())];
        self.drive(checkpoint, false, started, timings)
    }

    /// Continues the active run from the phase after its last commit.
    ///
    /// The run keeps the strategy it was started with.
    pub fn resume(&self) -> Result<RunSummary, SyncFailure> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started = Instant::now();
        let active = self.checkpoints.active()?.ok_or(SyncError::NoActiveRun)?;
        self.drive(active, true, started, Vec::new())
    }

    /// Detects the mapping, picks the strategy and commits MAPPING_RESOLVED
    /// for a new run.
    fn begin(
        &self,
        forced: Option<Strategy>,
        superseded: Option<Checkpoint>,
    ) -> SyncResult<Checkpoint> {
        let baseline = self.tracker.baseline()?;
        let has_baseline = baseline.is_some() && self.checkpoints.latest_completed()?.is_some();
        if forced == Some(Strategy::Incremental) && !has_baseline {
            return Err(SyncError::NoBaseline);
        }

        let detection = self.detector.detect()?;
        let decision = resolve_strategy(
            forced,
            &detection,
            has_baseline,
            self.config.smart_mapping_enabled,
        )?;
        info!("strategy {}: {}", decision.strategy, decision.reason);
        if decision.strategy == Strategy::Incremental
            && detection.classification() == Classification::Major
            && !detection.is_first_capture()
        {
            warn!("mapping change is MAJOR; an incremental run will not retract lost countries");
        }

        let mut artifacts = ArtifactRefs {
            mapping_sequence: Some(detection.current.sequence()),
            classification: (!detection.is_first_capture()).then(|| detection.classification()),
            ..ArtifactRefs::default()
        };
        if decision.strategy == Strategy::Incremental {
            artifacts.since = baseline.map(|b| b.watermark);
            if self.config.smart_mapping_enabled && !detection.is_first_capture() {
                artifacts.expansions = detection.diff.expansions();
            }
        }

        let mut run = SyncRun::start(decision.strategy, decision.reason);
        run.advance(Phase::MappingResolved)?;

        if let Some(mut old) = superseded {
            old.run.abandon()?;
            self.commit(&mut old)?;
            warn!("run {} abandoned in favour of run {}", old.run_id(), run.run_id);
            if let Err(e) = self.spool.remove_run(old.run_id()) {
                warn!("could not remove spool of run {}: {e}", old.run_id());
            }
        }

        let mut checkpoint = Checkpoint::new(run, artifacts);
        self.commit(&mut checkpoint)?;
        info!(
            "run {} started: {} against mapping snapshot {}",
            checkpoint.run_id(),
            checkpoint.run.strategy,
            detection.current.sequence()
        );
        Ok(checkpoint)
    }

    fn drive(
        &self,
        mut checkpoint: Checkpoint,
        resumed: bool,
        started: Instant,
        mut timings: Vec<(Phase, Duration)>,
    ) -> Result<RunSummary, SyncFailure> {
        if resumed {
            info!(
                "resuming {} run {} after {}",
                checkpoint.run.strategy,
                checkpoint.run_id(),
                checkpoint
                    .run
                    .phase
                    .map_or_else(|| "nothing".to_string(), |p| p.to_string())
            );
        }

        let outcome = self
            .advance_all(&mut checkpoint, &mut timings)
            .and_then(|()| self.finish(&mut checkpoint));

        match outcome {
            Ok(variants_committed) => {
                let summary = RunSummary {
                    run_id: checkpoint.run.run_id.clone(),
                    strategy: checkpoint.run.strategy,
                    reason: checkpoint.run.reason.clone(),
                    classification: checkpoint.artifacts.classification,
                    resumed,
                    fetched: checkpoint.artifacts.fetched,
                    exported: checkpoint
                        .artifacts
                        .exported
                        .iter()
                        .map(|(country, feed)| (country.clone(), feed.records))
                        .collect(),
                    uploaded: checkpoint.artifacts.uploaded.len(),
                    orphans_removed: checkpoint.artifacts.orphans_removed.unwrap_or(0),
                    variants_committed,
                    duration: started.elapsed(),
                    phase_timings: timings,
                };
                info!(
                    "{} run {} completed in {}ms: {} fetched, {} feeds uploaded",
                    summary.strategy,
                    summary.run_id,
                    summary.duration.as_millis(),
                    summary.fetched,
                    summary.uploaded
                );
                Ok(summary)
            }
            Err(err) => {
                if err.is_cancelled() {
                    warn!(
                        "run {} cancelled; last committed phase {:?}",
                        checkpoint.run_id(),
                        checkpoint.run.phase
                    );
                } else {
                    error!(
                        "run {} failed after {:?}: {err}",
                        checkpoint.run_id(),
                        checkpoint.run.phase
                    );
                }
                Err(SyncFailure {
                    run_id: Some(checkpoint.run.run_id.clone()),
                    strategy: Some(checkpoint.run.strategy),
                    last_completed: checkpoint.run.phase,
                    error: err,
                })
            }
        }
    }

    fn advance_all(
        &self,
        checkpoint: &mut Checkpoint,
        timings: &mut Vec<(Phase, Duration)>,
    ) -> SyncResult<()> {
        while let Some(phase) = checkpoint.run.next_phase() {
            self.cancel.check()?;
            let started = Instant::now();
            match phase {
                Phase::MappingResolved => {
                    return Err(SyncError::corruption(
                        checkpoint.run_id().to_string(),
                        "run was recorded without a resolved mapping",
                    ));
                }
                Phase::DataFetched => self.fetch(checkpoint)?,
                Phase::FeedsExported => self.export(checkpoint)?,
                Phase::UploadComplete => self.upload(checkpoint)?,
            }

            let mut next = checkpoint.clone();
            next.run.advance(phase)?;
            self.commit(&mut next)?;
            *checkpoint = next;

            let elapsed = started.elapsed();
            info!(
                "run {}: {phase} committed in {}ms",
                checkpoint.run_id(),
                elapsed.as_millis()
            );
            timings.push((phase, elapsed));
        }
        Ok(())
    }

    fn commit(&self, checkpoint: &mut Checkpoint) -> SyncResult<()> {
        checkpoint.updated_at = now_millis();
        self.checkpoints.commit(checkpoint)
    }

    /// Watermark the fetch starts after. Expanded locations need the whole
    /// catalog, since their variants may be unchanged at the source.
    fn fetch_since(checkpoint: &Checkpoint) -> Option<Revision> {
        match checkpoint.run.strategy {
            Strategy::Full => None,
            Strategy::Incremental if !checkpoint.artifacts.expansions.is_empty() => None,
            Strategy::Incremental => checkpoint.artifacts.since,
        }
    }

    fn fetch(&self, checkpoint: &mut Checkpoint) -> SyncResult<()> {
        let since = Self::fetch_since(checkpoint);
        match since {
            Some(since) => info!("fetching variants changed after {since}"),
            None => info!("fetching the full catalog"),
        }

        let products = &self.collaborators.products;
        let variants = self
            .config
            .retry
            .execute("fetch products", &self.cancel, |attempt| {
                debug!("product fetch attempt {attempt}");
                let mut fetched = Vec::new();
                for item in products.stream_products(since)? {
                    self.cancel.check()?;
                    fetched.push(item?);
                }
                Ok(fetched)
            })?;

        let key = self
            .spool
            .write_variants(checkpoint.run_id(), FETCH_SPOOL, &variants)?;
        checkpoint.artifacts.fetch_spool = Some(key);
        checkpoint.artifacts.fetched = variants.len() as u64;
        info!("fetched {} variants", variants.len());
        Ok(())
    }

    /// Works out which records go to which country feed.
    ///
    /// Depends only on the spool, the run's mapping snapshot and the
    /// tracker, none of which change before the run completes; export and
    /// completion therefore see the same plan, however often the run is
    /// resumed.
    fn plan(&self, checkpoint: &Checkpoint) -> SyncResult<ExportPlan> {
        let run_id = checkpoint.run_id().to_string();
        let sequence = checkpoint
            .artifacts
            .mapping_sequence
            .ok_or_else(|| SyncError::corruption(&run_id, "no mapping snapshot recorded"))?;
        let spool_key = checkpoint
            .artifacts
            .fetch_spool
            .as_deref()
            .ok_or_else(|| SyncError::corruption(&run_id, "no fetched data recorded"))?;

        let mapping = self.detector.snapshot(sequence)?;
        let fetched = latest_per_variant(self.spool.read_variants(spool_key)?);
        let watermark = fetched
            .iter()
            .map(|v| v.revision)
            .chain(checkpoint.artifacts.since)
            .max()
            .unwrap_or_default();

        let selected = match checkpoint.run.strategy {
            Strategy::Full => fetched,
            Strategy::Incremental => {
                let expanded: BTreeSet<&LocationId> =
                    checkpoint.artifacts.expansions.keys().collect();
                let (mut selected, rest): (Vec<_>, Vec<_>) = fetched
                    .into_iter()
                    .partition(|v| v.location_ids.iter().any(|l| expanded.contains(l)));
                let reexported = selected.len();
                selected.extend(
                    self.tracker
                        .filter_changed(rest, checkpoint.artifacts.since)?,
                );
                debug!(
                    "incremental selection: {} changed, {reexported} at expanded locations",
                    selected.len() - reexported
                );
                selected.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));
                selected
            }
        };

        let mut feeds: BTreeMap<CountryCode, Vec<FeedRecord>> = BTreeMap::new();
        let mut commits = Vec::with_capacity(selected.len());
        for variant in selected {
            let record = variant.route(&mapping);
            commits.push(VariantCommit {
                variant_id: record.variant.variant_id.clone(),
                revision: record.variant.revision,
                countries: record.countries.clone(),
            });
            for country in &record.countries {
                feeds.entry(country.clone()).or_default().push(record.clone());
            }
        }

        Ok(ExportPlan {
            feeds,
            commits,
            watermark,
        })
    }

    fn export(&self, checkpoint: &mut Checkpoint) -> SyncResult<()> {
        let plan = self.plan(checkpoint)?;
        let mode = match checkpoint.run.strategy {
            Strategy::Full => WriteMode::Replace,
            Strategy::Incremental => WriteMode::Merge,
        };
        if plan.feeds.is_empty() {
            info!("nothing to export");
        }

        for (country, records) in &plan.feeds {
            if checkpoint.artifacts.exported.contains_key(country) {
                debug!("{country} feed already exported; skipping");
                continue;
            }
            self.cancel.check()?;
            let file = self.config.retry.execute(
                &format!("export {country} feed"),
                &self.cancel,
                |_| {
                    self.collaborators
                        .feeds
                        .write_country_feed(country, records, mode)
                },
            )?;
            info!("{country} feed: {} records ({mode})", records.len());
            checkpoint.artifacts.exported.insert(
                country.clone(),
                ExportedFeed {
                    file,
                    records: records.len() as u64,
                },
            );
            self.commit(checkpoint)?;
        }
        Ok(())
    }

    fn upload(&self, checkpoint: &mut Checkpoint) -> SyncResult<()> {
        let pending: Vec<(CountryCode, FileRef)> = checkpoint
            .artifacts
            .exported
            .iter()
            .filter(|(country, _)| !checkpoint.artifacts.uploaded.contains_key(*country))
            .map(|(country, feed)| (country.clone(), feed.file.clone()))
            .collect();
        if pending.len() < checkpoint.artifacts.exported.len() {
            debug!(
                "{} feeds already uploaded",
                checkpoint.artifacts.exported.len() - pending.len()
            );
        }

        for batch in pending.chunks(self.config.max_concurrent_uploads) {
            self.cancel.check()?;
            let mut failure = None;
            let mut progressed = false;
            for (country, result) in self.upload_batch(batch) {
                match result {
                    Ok(remote) => {
                        info!("{country} feed uploaded as {remote}");
                        checkpoint.artifacts.uploaded.insert(country, remote);
                        progressed = true;
                    }
                    Err(e) => {
                        warn!("{country} feed upload failed: {e}");
                        failure.get_or_insert(e);
                    }
                }
            }
            if progressed {
                self.commit(checkpoint)?;
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }

        if checkpoint.run.strategy == Strategy::Full
            && checkpoint.artifacts.orphans_removed.is_none()
        {
            let removed = if checkpoint.artifacts.fetched == 0 {
                warn!("full sync fetched no variants; keeping existing remote feeds");
                0
            } else {
                let current: BTreeSet<RemoteId> =
                    checkpoint.artifacts.uploaded.values().cloned().collect();
                let uploads = &self.collaborators.uploads;
                self.config
                    .retry
                    .execute("delete orphaned feeds", &self.cancel, |_| {
                        uploads.delete_orphans(&current)
                    })?
            };
            if removed > 0 {
                info!("deleted {removed} orphaned remote feeds");
            }
            checkpoint.artifacts.orphans_removed = Some(removed);
        }
        Ok(())
    }

    /// Uploads one batch concurrently, one thread per feed.
    fn upload_batch(
        &self,
        batch: &[(CountryCode, FileRef)],
    ) -> Vec<(CountryCode, SyncResult<RemoteId>)> {
        let uploads = &self.collaborators.uploads;
        let retry = &self.config.retry;
        let cancel = &self.cancel;

        thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|(country, file)| {
                    let handle = scope.spawn(move || {
                        retry.execute(&format!("upload {country} feed"), cancel, |_| {
                            uploads.upload(file)
                        })
                    });
                    (country, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(country, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(SyncError::collaborator(format!(
                            "upload worker for {country} panicked"
                        )))
                    });
                    (country.clone(), result)
                })
                .collect()
        })
    }

    /// Commits tracker state and marks the run completed.
    fn finish(&self, checkpoint: &mut Checkpoint) -> SyncResult<usize> {
        self.cancel.check()?;
        let plan = self.plan(checkpoint)?;
        self.tracker
            .commit_run(checkpoint.run_id(), &plan.commits, plan.watermark)?;

        let mut done = checkpoint.clone();
        done.artifacts.published = self.published_after(&done)?;
        done.run.complete()?;
        self.commit(&mut done)?;
        *checkpoint = done;

        // The feeds now reflect this run's mapping. If settling fails the
        // next run compares against an older snapshot and redoes work.
        if let Some(sequence) = checkpoint.artifacts.mapping_sequence {
            match self.detector.history().settle(sequence) {
                Ok(()) => debug!("mapping snapshot {sequence} settled"),
                Err(e) => warn!("could not settle mapping snapshot {sequence}: {e}"),
            }
        }

        self.housekeeping(checkpoint.run_id());
        Ok(plan.commits.len())
    }

    fn published_after(&self, checkpoint: &Checkpoint) -> SyncResult<BTreeMap<CountryCode, RemoteId>> {
        let uploaded = checkpoint.artifacts.uploaded.clone();
        if checkpoint.run.strategy == Strategy::Full {
            return Ok(uploaded);
        }
        let mut published = self
            .checkpoints
            .latest_completed()?
            .map(|c| c.artifacts.published)
            .unwrap_or_default();
        published.extend(uploaded);
        Ok(published)
    }

    /// Drops the run's spool, older finished checkpoints and old mapping
    /// snapshots. Failures are logged only; the run is already complete.
    fn housekeeping(&self, run_id: &RunId) {
        match self.spool.remove_run(run_id) {
            Ok(n) => debug!("removed {n} spooled artifacts of run {run_id}"),
            Err(e) => warn!("could not remove spool of run {run_id}: {e}"),
        }
        match self.checkpoints.prune_finished(run_id) {
            Ok(n) => debug!("pruned {n} finished checkpoints"),
            Err(e) => warn!("could not prune finished checkpoints: {e}"),
        }
        match self.detector.history().prune(SNAPSHOTS_KEPT) {
            Ok(n) => debug!("pruned {n} mapping snapshots"),
            Err(e) => warn!("could not prune mapping snapshots: {e}"),
        }
    }

    fn ensure_idle(&self) -> SyncResult<()> {
        match self.checkpoints.active()? {
            Some(active) => Err(SyncError::ActiveRunConflict {
                run_id: active.run.run_id,
            }),
            None => Ok(()),
        }
    }

    /// Deletes remote feeds not published by the last completed run. With
    /// target countries configured, published feeds of other countries are
    /// deleted too.
    ///
    /// Refuses while a run is active. Does nothing when no published feed
    /// is left to keep.
    pub fn cleanup_orphans(&self) -> SyncResult<usize> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.ensure_idle()?;
        let last = self
            .checkpoints
            .latest_completed()?
            .ok_or(SyncError::NoBaseline)?;
        let targets = self.config.target_countries.as_ref();
        let current: BTreeSet<RemoteId> = last
            .artifacts
            .published
            .iter()
            .filter(|(country, _)| targets.map_or(true, |t| t.contains(*country)))
            .map(|(_, remote)| remote.clone())
            .collect();
        if current.is_empty() {
            warn!("no published feeds to keep; skipping orphan cleanup");
            return Ok(0);
        }
        let uploads = &self.collaborators.uploads;
        let removed = self
            .config
            .retry
            .execute("delete orphaned feeds", &self.cancel, |_| {
                uploads.delete_orphans(&current)
            })?;
        info!("deleted {removed} orphaned remote feeds");
        Ok(removed)
    }

    /// Discards the mapping history and captures a fresh baseline snapshot.
    pub fn refresh_mapping(&self) -> SyncResult<Detection> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.ensure_idle()?;
        self.detector.refresh()
    }

    /// Clears the mapping history and the variant state, so the next smart
    /// run is FULL. Returns the number of snapshots removed.
    pub fn clear_cache(&self) -> SyncResult<usize> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.ensure_idle()?;
        let snapshots = self.detector.history().clear()?;
        let tracker = self.tracker.reset()?;
        info!(
            "cache cleared: {snapshots} mapping snapshots, variant state {}",
            if tracker { "removed" } else { "already empty" }
        );
        Ok(snapshots)
    }

    /// Removes a run's checkpoint and spool; the active run by default.
    ///
    /// Clearing an unfinished run, or one whose checkpoint can no longer be
    /// read, also forgets the settled mapping snapshot: the published feeds
    /// may be half updated, so the next smart run is FULL.
    pub fn clear_checkpoint(&self, run_id: Option<&RunId>) -> SyncResult<RunId> {
        let _guard = RunGuard::acquire(&self.running)?;
        let (run_id, unfinished) = match run_id {
            Some(run_id) => {
                let unfinished = self
                    .checkpoints
                    .load(run_id)
                    .map_or(true, |c| c.is_some_and(|c| c.run.is_active()));
                (run_id.clone(), unfinished)
            }
            None => {
                let active = self.checkpoints.active()?.ok_or(SyncError::NoActiveRun)?;
                (active.run.run_id, true)
            }
        };
        if !self.checkpoints.clear(&run_id)? {
            return Err(SyncError::UnknownRun(run_id));
        }
        let spooled = self.spool.remove_run(&run_id)?;
        info!("checkpoint of run {run_id} cleared ({spooled} spooled artifacts removed)");
        if unfinished && self.detector.history().unsettle()? {
            info!("run {run_id} never completed; the next smart sync runs FULL");
        }
        Ok(run_id)
    }

    /// Collects the current state for inspection.
    pub fn report(&self) -> SyncResult<StateReport> {
        StateReport::collect(
            self.checkpoints.as_ref(),
            &self.detector,
            &self.tracker,
            &self.config,
        )
    }
}

/// Keeps the highest revision of each variant, ordered by identifier.
fn latest_per_variant(variants: Vec<SourceVariant>) -> Vec<SourceVariant> {
    let mut latest: BTreeMap<VariantId, SourceVariant> = BTreeMap::new();
    for variant in variants {
        match latest.get(&variant.variant_id) {
            Some(kept) if kept.revision > variant.revision => {}
            _ => {
                latest.insert(variant.variant_id.clone(), variant);
            }
        }
    }
    latest.into_values().collect()
}
