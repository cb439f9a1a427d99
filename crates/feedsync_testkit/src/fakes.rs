//! Scripted collaborators.
//!
//! Each fake keeps its state in memory, counts its calls and can be told
//! to fail the next `n` calls with a chosen [`Fault`]. They are shared with
//! the orchestrator through `Arc`, so a test keeps a handle to inspect
//! what happened.

use feedsync_engine::{
    CheckpointStore, FeedUploader, FeedWriter, MappingSource, ProductSource, SyncError,
    SyncResult, VariantStream, WriteMode,
};
use feedsync_storage::StorageError;
use feedsync_types::{
    Checkpoint, CountryCode, FeedRecord, FileRef, MappingEntries, RemoteId, Revision, RunId,
    SourceVariant, VariantId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A failure a fake can be scripted to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Timeout or rate limit; retried by the engine.
    Transient,
    /// Rejected credentials; never retried.
    Unauthorized,
    /// Any other permanent failure.
    Permanent,
}

impl Fault {
    /// Builds the error this fault stands for.
    pub fn into_error(self, context: &str) -> SyncError {
        match self {
            Fault::Transient => SyncError::transient(format!("{context}: 503 service unavailable")),
            Fault::Unauthorized => SyncError::Authorization(format!("{context}: token expired")),
            Fault::Permanent => SyncError::collaborator(format!("{context}: scripted failure")),
        }
    }
}

#[derive(Debug, Default)]
struct FaultQueue(Mutex<VecDeque<Fault>>);

impl FaultQueue {
    fn push(&self, fault: Fault, times: usize) {
        self.0.lock().extend(std::iter::repeat(fault).take(times));
    }

    fn check(&self, context: &str) -> SyncResult<()> {
        match self.0.lock().pop_front() {
            Some(fault) => Err(fault.into_error(context)),
            None => Ok(()),
        }
    }
}

/// In-memory storefront catalog.
///
/// `stream_products(since)` yields the variants whose revision is greater
/// than `since`, in identifier order.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    variants: Mutex<BTreeMap<VariantId, SourceVariant>>,
    faults: FaultQueue,
    requests: Mutex<Vec<Option<Revision>>>,
}

impl FakeCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding `variants`.
    pub fn with_variants(variants: impl IntoIterator<Item = SourceVariant>) -> Self {
        let catalog = Self::new();
        for variant in variants {
            catalog.upsert(variant);
        }
        catalog
    }

    /// Adds or replaces a variant.
    pub fn upsert(&self, variant: SourceVariant) {
        self.variants
            .lock()
            .insert(variant.variant_id.clone(), variant);
    }

    /// Fails the next `times` fetches.
    pub fn fail_next(&self, fault: Fault, times: usize) {
        self.faults.push(fault, times);
    }

    /// Number of fetch calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// The `since` argument of every fetch call.
    pub fn requests(&self) -> Vec<Option<Revision>> {
        self.requests.lock().clone()
    }
}

impl ProductSource for FakeCatalog {
    fn stream_products(&self, since: Option<Revision>) -> SyncResult<VariantStream> {
        self.requests.lock().push(since);
        self.faults.check("catalog")?;
        let matching: Vec<SourceVariant> = self
            .variants
            .lock()
            .values()
            .filter(|v| since.map_or(true, |since| v.revision > since))
            .cloned()
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }
}

/// One call to [`FakeFeedWriter::write_country_feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedWrite {
    /// Destination country.
    pub country: CountryCode,
    /// Requested mode.
    pub mode: WriteMode,
    /// Variants in the call, in order.
    pub variants: Vec<VariantId>,
}

/// In-memory feed files, one per country.
#[derive(Debug, Default)]
pub struct FakeFeedWriter {
    feeds: Mutex<BTreeMap<CountryCode, BTreeMap<VariantId, FeedRecord>>>,
    writes: Mutex<Vec<FeedWrite>>,
    faults: Mutex<BTreeMap<CountryCode, VecDeque<Fault>>>,
}

impl FakeFeedWriter {
    /// Creates a writer with no feeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// The file reference handed out for a country.
    pub fn file_for(country: &CountryCode) -> FileRef {
        FileRef::new(format!("feeds/{country}.jsonl")).expect("valid identifier")
    }

    /// Fails the next `times` writes of one country's feed.
    pub fn fail_country(&self, country: &CountryCode, fault: Fault, times: usize) {
        self.faults
            .lock()
            .entry(country.clone())
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
    }

    /// Variants currently in a country's feed.
    pub fn feed(&self, country: &CountryCode) -> Vec<VariantId> {
        self.feeds
            .lock()
            .get(country)
            .map(|feed| feed.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Countries with a feed file.
    pub fn countries(&self) -> Vec<CountryCode> {
        self.feeds.lock().keys().cloned().collect()
    }

    /// Every write call so far.
    pub fn writes(&self) -> Vec<FeedWrite> {
        self.writes.lock().clone()
    }

    /// Write calls for one country.
    pub fn writes_for(&self, country: &CountryCode) -> Vec<FeedWrite> {
        self.writes
            .lock()
            .iter()
            .filter(|w| &w.country == country)
            .cloned()
            .collect()
    }
}

impl FeedWriter for FakeFeedWriter {
    fn write_country_feed(
        &self,
        country: &CountryCode,
        records: &[FeedRecord],
        mode: WriteMode,
    ) -> SyncResult<FileRef> {
        if let Some(fault) = self
            .faults
            .lock()
            .get_mut(country)
            .and_then(VecDeque::pop_front)
        {
            return Err(fault.into_error(&format!("feed writer ({country})")));
        }

        self.writes.lock().push(FeedWrite {
            country: country.clone(),
            mode,
            variants: records.iter().map(|r| r.variant.variant_id.clone()).collect(),
        });

        let mut feeds = self.feeds.lock();
        let feed = feeds.entry(country.clone()).or_default();
        if mode == WriteMode::Replace {
            feed.clear();
        }
        for record in records {
            feed.insert(record.variant.variant_id.clone(), record.clone());
        }
        Ok(Self::file_for(country))
    }
}

/// In-memory remote folder.
#[derive(Debug, Default)]
pub struct FakeUploader {
    remote: Mutex<BTreeMap<RemoteId, FileRef>>,
    uploads: Mutex<Vec<FileRef>>,
    faults: Mutex<BTreeMap<FileRef, VecDeque<Fault>>>,
    orphan_faults: FaultQueue,
    orphan_calls: Mutex<Vec<BTreeSet<RemoteId>>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeUploader {
    /// Creates an empty remote folder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The remote identifier a file is stored under.
    pub fn remote_id_for(file: &FileRef) -> RemoteId {
        RemoteId::new(format!("drive:{file}")).expect("valid identifier")
    }

    /// Places a file in the remote folder that no run uploaded.
    pub fn seed_remote(&self, name: &str) -> RemoteId {
        let file = FileRef::new(name).expect("valid identifier");
        let id = Self::remote_id_for(&file);
        self.remote.lock().insert(id.clone(), file);
        id
    }

    /// Makes every upload take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Fails the next `times` uploads of a country's feed.
    pub fn fail_country(&self, country: &CountryCode, fault: Fault, times: usize) {
        self.faults
            .lock()
            .entry(FakeFeedWriter::file_for(country))
            .or_default()
            .extend(std::iter::repeat(fault).take(times));
    }

    /// Fails the next `times` orphan deletions.
    pub fn fail_orphan_cleanup(&self, fault: Fault, times: usize) {
        self.orphan_faults.push(fault, times);
    }

    /// Files uploaded so far, in call order.
    pub fn uploads(&self) -> Vec<FileRef> {
        self.uploads.lock().clone()
    }

    /// Identifiers currently stored remotely.
    pub fn remote_ids(&self) -> BTreeSet<RemoteId> {
        self.remote.lock().keys().cloned().collect()
    }

    /// Arguments of every `delete_orphans` call.
    pub fn orphan_calls(&self) -> Vec<BTreeSet<RemoteId>> {
        self.orphan_calls.lock().clone()
    }

    /// Highest number of uploads observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FeedUploader for FakeUploader {
    fn upload(&self, file: &FileRef) -> SyncResult<RemoteId> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let fault = self
            .faults
            .lock()
            .get_mut(file)
            .and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(fault) = fault {
            return Err(fault.into_error(&format!("upload {file}")));
        }

        self.uploads.lock().push(file.clone());
        let id = Self::remote_id_for(file);
        self.remote.lock().insert(id.clone(), file.clone());
        Ok(id)
    }

    fn delete_orphans(&self, current: &BTreeSet<RemoteId>) -> SyncResult<usize> {
        self.orphan_calls.lock().push(current.clone());
        self.orphan_faults.check("orphan cleanup")?;
        let mut remote = self.remote.lock();
        let before = remote.len();
        remote.retain(|id, _| current.contains(id));
        Ok(before - remote.len())
    }
}

/// Mapping source whose answer the test controls.
#[derive(Debug, Default)]
pub struct FakeMapping {
    entries: Mutex<MappingEntries>,
    faults: FaultQueue,
    calls: AtomicUsize,
}

impl FakeMapping {
    /// Creates a source answering with `entries`.
    pub fn new(entries: MappingEntries) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Self::default()
        }
    }

    /// Changes the answer for later fetches.
    pub fn set(&self, entries: MappingEntries) {
        *self.entries.lock() = entries;
    }

    /// Fails the next `times` fetches.
    pub fn fail_next(&self, fault: Fault, times: usize) {
        self.faults.push(fault, times);
    }

    /// Number of fetch calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MappingSource for FakeMapping {
    fn fetch_mapping(&self) -> SyncResult<MappingEntries> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.faults.check("mapping source")?;
        Ok(self.entries.lock().clone())
    }
}

/// Checkpoint store wrapper that simulates a crash on a chosen commit.
pub struct FlakyCheckpointStore {
    inner: Arc<dyn CheckpointStore>,
    commits: AtomicUsize,
    fail_at: Mutex<Option<usize>>,
}

impl FlakyCheckpointStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_at: Mutex::new(None),
        }
    }

    /// Makes the `n`-th commit from now (1-based) fail without writing.
    pub fn fail_commit(&self, n: usize) {
        *self.fail_at.lock() = Some(self.commits.load(Ordering::SeqCst) + n);
    }

    /// Commits attempted so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for FlakyCheckpointStore {
    fn load(&self, run_id: &RunId) -> SyncResult<Option<Checkpoint>> {
        self.inner.load(run_id)
    }

    fn commit(&self, checkpoint: &Checkpoint) -> SyncResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        let mut fail_at = self.fail_at.lock();
        if *fail_at == Some(n) {
            *fail_at = None;
            return Err(SyncError::Storage(StorageError::Io(std::io::Error::other(
                "simulated crash",
            ))));
        }
        self.inner.commit(checkpoint)
    }

    fn clear(&self, run_id: &RunId) -> SyncResult<bool> {
        self.inner.clear(run_id)
    }

    fn list(&self) -> SyncResult<Vec<Checkpoint>> {
        self.inner.list()
    }
}
