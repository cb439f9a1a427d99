//! Mapping change detection.
//!
//! Each detection fetches the current location to country assignment,
//! appends it to the snapshot history and compares it with the settled
//! snapshot: the one the published feeds reflect. A snapshot becomes
//! settled when the run resolved against it completes, or when an operator
//! refreshes the mapping. Snapshots captured by runs that never finish are
//! kept but never compared against, so a change stays visible until some
//! run has actually applied it.

use crate::cancel::CancelToken;
use crate::collaborators::MappingSource;
use crate::document;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use feedsync_storage::StateBackend;
use feedsync_types::{Classification, CountrySet, MappingDiff, MappingEntries, MappingSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const PREFIX: &str = "mappings/";
const SETTLED_KEY: &str = "mapping_settled.json";

#[derive(Serialize, Deserialize)]
struct Settled {
    sequence: u64,
}

/// Append-only history of mapping snapshots, plus the pointer to the
/// settled one.
#[derive(Clone)]
pub struct SnapshotHistory {
    backend: Arc<dyn StateBackend>,
}

impl SnapshotHistory {
    /// Creates a history stored in `backend`.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    fn key(sequence: u64) -> String {
        format!("{PREFIX}{sequence:010}.json")
    }

    fn sequence_of(key: &str) -> Option<u64> {
        key.strip_prefix(PREFIX)?.strip_suffix(".json")?.parse().ok()
    }

    fn keys(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .backend
            .list(PREFIX)?
            .into_iter()
            .filter(|k| k.ends_with(".json"))
            .collect())
    }

    /// Loads the snapshot with the given sequence number.
    pub fn get(&self, sequence: u64) -> SyncResult<Option<MappingSnapshot>> {
        document::load(self.backend.as_ref(), &Self::key(sequence))
    }

    /// Loads the newest snapshot.
    pub fn latest(&self) -> SyncResult<Option<MappingSnapshot>> {
        match self.keys()?.last() {
            Some(key) => document::load(self.backend.as_ref(), key),
            None => Ok(None),
        }
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true when nothing has been captured yet.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.keys()?.is_empty())
    }

    /// Captures `entries` as the next snapshot and stores it.
    pub fn append(&self, entries: MappingEntries) -> SyncResult<MappingSnapshot> {
        let next = match self.latest()? {
            Some(latest) => latest.sequence() + 1,
            None => 1,
        };
        let snapshot = MappingSnapshot::capture(next, entries);
        document::store(self.backend.as_ref(), &Self::key(next), &snapshot)?;
        Ok(snapshot)
    }

    /// Sequence number of the settled snapshot.
    pub fn settled_sequence(&self) -> SyncResult<Option<u64>> {
        let settled: Option<Settled> = document::load(self.backend.as_ref(), SETTLED_KEY)?;
        Ok(settled.map(|s| s.sequence))
    }

    /// Loads the settled snapshot.
    pub fn settled(&self) -> SyncResult<Option<MappingSnapshot>> {
        let Some(sequence) = self.settled_sequence()? else {
            return Ok(None);
        };
        match self.get(sequence)? {
            Some(snapshot) => Ok(Some(snapshot)),
            None => Err(SyncError::corruption(
                SETTLED_KEY,
                format!("settled mapping snapshot {sequence} is missing"),
            )),
        }
    }

    /// Marks snapshot `sequence` as the one the published feeds reflect.
    pub fn settle(&self, sequence: u64) -> SyncResult<()> {
        document::store(self.backend.as_ref(), SETTLED_KEY, &Settled { sequence })
    }

    /// Forgets the settled snapshot, so the next detection has nothing to
    /// compare against. Returns false when nothing was settled.
    pub fn unsettle(&self) -> SyncResult<bool> {
        Ok(self.backend.remove(SETTLED_KEY)?)
    }

    /// Deletes snapshots older than the settled one, keeping at least the
    /// newest `keep`. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> SyncResult<usize> {
        let Some(settled) = self.settled_sequence()? else {
            return Ok(0);
        };
        let keys = self.keys()?;
        let excess = keys.len().saturating_sub(keep);
        let mut removed = 0;
        for key in &keys[..excess] {
            if Self::sequence_of(key).is_some_and(|s| s < settled) && self.backend.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes every snapshot and the settled pointer. Returns how many
    /// snapshots were removed.
    pub fn clear(&self) -> SyncResult<usize> {
        let mut removed = 0;
        for key in self.keys()? {
            if self.backend.remove(&key)? {
                removed += 1;
            }
        }
        self.unsettle()?;
        Ok(removed)
    }
}

/// Outcome of one detection.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Settled snapshot this detection was compared with, if any.
    pub previous: Option<MappingSnapshot>,
    /// Snapshot captured by this detection.
    pub current: MappingSnapshot,
    /// Differences between the two.
    pub diff: MappingDiff,
}

impl Detection {
    /// Severity of the change.
    pub fn classification(&self) -> Classification {
        self.diff.classification
    }

    /// True when no settled snapshot existed to compare against.
    pub fn is_first_capture(&self) -> bool {
        self.previous.is_none()
    }
}

/// Detects changes to the location to country mapping.
pub struct MappingChangeDetector {
    source: Arc<dyn MappingSource>,
    history: SnapshotHistory,
    retry: RetryPolicy,
    cancel: CancelToken,
    targets: Option<CountrySet>,
}

impl MappingChangeDetector {
    /// Creates a detector.
    pub fn new(
        source: Arc<dyn MappingSource>,
        history: SnapshotHistory,
        retry: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            history,
            retry,
            cancel,
            targets: None,
        }
    }

    /// Keeps only `targets` in every captured snapshot. `None` keeps all.
    pub fn with_target_countries(mut self, targets: Option<CountrySet>) -> Self {
        self.targets = targets;
        self
    }

    fn restrict(&self, entries: MappingEntries) -> MappingEntries {
        let Some(targets) = &self.targets else {
            return entries;
        };
        entries
            .into_iter()
            .map(|(location, countries)| {
                let kept = countries.intersection(targets).cloned().collect();
                (location, kept)
            })
            .collect()
    }

    /// The snapshot history this detector appends to.
    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Compares two snapshots. With no previous snapshot every location
    /// counts as added.
    pub fn compare(previous: Option<&MappingSnapshot>, current: &MappingSnapshot) -> MappingDiff {
        match previous {
            Some(previous) => MappingDiff::between(previous, current),
            None => MappingDiff::initial(current),
        }
    }

    /// Fetches the current mapping, appends it to the history and
    /// classifies it against the settled snapshot.
    pub fn detect(&self) -> SyncResult<Detection> {
        let entries = self
            .retry
            .execute("fetch mapping", &self.cancel, |_| self.source.fetch_mapping())?;
        let previous = self.history.settled()?;
        let current = self.history.append(self.restrict(entries))?;
        let diff = Self::compare(previous.as_ref(), &current);

        match &previous {
            Some(prev) => info!(
                "mapping snapshot {} vs {}: {} ({} added, {} removed, {} changed)",
                current.sequence(),
                prev.sequence(),
                diff.classification,
                diff.added.len(),
                diff.removed.len(),
                diff.changed.len()
            ),
            None => info!(
                "mapping snapshot {} captured with nothing settled: {} locations",
                current.sequence(),
                current.entries().len()
            ),
        }
        debug!("mapping fingerprint {}", current.fingerprint());

        Ok(Detection {
            previous,
            current,
            diff,
        })
    }

    /// Discards the history and settles a freshly captured snapshot.
    pub fn refresh(&self) -> SyncResult<Detection> {
        let removed = self.history.clear()?;
        info!("mapping history cleared ({removed} snapshots)");
        let detection = self.detect()?;
        self.history.settle(detection.current.sequence())?;
        Ok(detection)
    }

    /// Loads the snapshot a run was resolved against.
    pub fn snapshot(&self, sequence: u64) -> SyncResult<MappingSnapshot> {
        self.history.get(sequence)?.ok_or_else(|| {
            SyncError::corruption(
                SnapshotHistory::key(sequence),
                "mapping snapshot referenced by the run is missing",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_storage::InMemoryBackend;
    use feedsync_types::{CountryCode, CountrySet, LocationId};
    use parking_lot::Mutex;

    struct ScriptedMapping(Mutex<Vec<MappingEntries>>);

    impl MappingSource for ScriptedMapping {
        fn fetch_mapping(&self) -> SyncResult<MappingEntries> {
            let mut queue = self.0.lock();
            if queue.is_empty() {
                return Err(SyncError::collaborator("script exhausted"));
            }
            Ok(queue.remove(0))
        }
    }

    fn countries(codes: &[&str]) -> CountrySet {
        codes.iter().map(|c| CountryCode::new(c).unwrap()).collect()
    }

    fn entries(pairs: &[(&str, &[&str])]) -> MappingEntries {
        pairs
            .iter()
            .map(|(loc, codes)| (LocationId::new(*loc).unwrap(), countries(codes)))
            .collect()
    }

    fn detector(script: Vec<MappingEntries>) -> MappingChangeDetector {
        let backend: Arc<dyn StateBackend> = Arc::new(InMemoryBackend::new());
        MappingChangeDetector::new(
            Arc::new(ScriptedMapping(Mutex::new(script))),
            SnapshotHistory::new(backend),
            RetryPolicy::no_retry(),
            CancelToken::new(),
        )
    }

    #[test]
    fn first_detection_has_no_previous() {
        let detector = detector(vec![entries(&[("loc1", &["US"])])]);
        let detection = detector.detect().unwrap();

        assert!(detection.is_first_capture());
        assert_eq!(detection.current.sequence(), 1);
        assert_eq!(detection.diff.added.len(), 1);
        assert_eq!(detector.history().len().unwrap(), 1);
    }

    fn detect_settled(detector: &MappingChangeDetector) -> Detection {
        let detection = detector.detect().unwrap();
        detector
            .history()
            .settle(detection.current.sequence())
            .unwrap();
        detection
    }

    #[test]
    fn added_country_is_minor() {
        let detector = detector(vec![
            entries(&[("loc1", &["US"])]),
            entries(&[("loc1", &["US", "CA"])]),
        ]);
        detect_settled(&detector);
        let detection = detector.detect().unwrap();

        assert_eq!(detection.classification(), Classification::Minor);
        assert_eq!(detection.previous.unwrap().sequence(), 1);
        assert_eq!(detection.current.sequence(), 2);
        assert_eq!(
            detection.diff.expansions()[&LocationId::new("loc1").unwrap()],
            countries(&["CA"])
        );
    }

    #[test]
    fn removed_location_is_major() {
        let detector = detector(vec![
            entries(&[("loc1", &["US"]), ("loc2", &["CA"])]),
            entries(&[("loc1", &["US"])]),
        ]);
        detect_settled(&detector);
        assert_eq!(
            detector.detect().unwrap().classification(),
            Classification::Major
        );
    }

    #[test]
    fn identical_mapping_is_unchanged() {
        let mapping = entries(&[("loc1", &["US"])]);
        let detector = detector(vec![mapping.clone(), mapping]);
        detect_settled(&detector);
        assert_eq!(
            detector.detect().unwrap().classification(),
            Classification::Unchanged
        );
        assert_eq!(detector.history().len().unwrap(), 2);
    }

    #[test]
    fn refresh_restarts_history() {
        let mapping = entries(&[("loc1", &["US"])]);
        let detector = detector(vec![mapping.clone(), mapping.clone(), mapping]);
        detector.detect().unwrap();
        detector.detect().unwrap();

        let detection = detector.refresh().unwrap();
        assert!(detection.is_first_capture());
        assert_eq!(detection.current.sequence(), 1);
        assert_eq!(detector.history().len().unwrap(), 1);
        assert_eq!(detector.history().settled_sequence().unwrap(), Some(1));
    }

    #[test]
    fn unsettled_snapshots_are_not_compared_against() {
        let detector = detector(vec![
            entries(&[("loc1", &["US"]), ("loc2", &["CA"])]),
            entries(&[("loc1", &["US"])]),
            entries(&[("loc1", &["US"])]),
        ]);
        detect_settled(&detector);

        // Captured by a run that never completed
        let first = detector.detect().unwrap();
        assert_eq!(first.classification(), Classification::Major);

        let again = detector.detect().unwrap();
        assert_eq!(again.previous.as_ref().unwrap().sequence(), 1);
        assert_eq!(again.current.sequence(), 3);
        assert_eq!(again.classification(), Classification::Major);
    }

    #[test]
    fn unsettle_makes_the_next_detection_a_first_capture() {
        let mapping = entries(&[("loc1", &["US"])]);
        let detector = detector(vec![mapping.clone(), mapping]);
        detect_settled(&detector);

        assert!(detector.history().unsettle().unwrap());
        assert!(!detector.history().unsettle().unwrap());
        assert!(detector.detect().unwrap().is_first_capture());
    }

    #[test]
    fn prune_keeps_recent_and_settled_snapshots() {
        let mapping = entries(&[("loc1", &["US"])]);
        let detector = detector(vec![mapping; 6]);
        for _ in 0..4 {
            detect_settled(&detector);
        }
        detector.detect().unwrap();
        detector.detect().unwrap();
        detector.history().settle(4).unwrap();

        // Six snapshots settled at 4; keeping four leaves only 1 and 2 prunable
        assert_eq!(detector.history().prune(4).unwrap(), 2);
        assert_eq!(detector.history().len().unwrap(), 4);
        assert!(detector.history().get(3).unwrap().is_some());
        assert_eq!(detector.history().settled().unwrap().unwrap().sequence(), 4);

        // Nothing newer than the settled snapshot is ever pruned
        assert_eq!(detector.history().prune(0).unwrap(), 1);
        assert_eq!(detector.history().len().unwrap(), 3);
        assert!(detector.history().get(4).unwrap().is_some());
    }

    #[test]
    fn clear_forgets_the_settled_snapshot() {
        let mapping = entries(&[("loc1", &["US"])]);
        let detector = detector(vec![mapping]);
        detect_settled(&detector);

        assert_eq!(detector.history().clear().unwrap(), 1);
        assert_eq!(detector.history().settled_sequence().unwrap(), None);
    }

    #[test]
    fn target_countries_filter_the_snapshot() {
        let detector = detector(vec![entries(&[
            ("loc1", &["US", "FR"]),
            ("loc2", &["FR"]),
        ])])
        .with_target_countries(Some(countries(&["US", "CA"])));

        let detection = detector.detect().unwrap();
        assert_eq!(
            detection.current.entries(),
            &entries(&[("loc1", &["US"])])
        );
    }

    #[test]
    fn fetch_failure_leaves_history_untouched() {
        let detector = detector(vec![]);
        assert!(detector.detect().is_err());
        assert!(detector.history().is_empty().unwrap());
    }

    #[test]
    fn missing_snapshot_is_corruption() {
        let detector = detector(vec![]);
        assert!(matches!(
            detector.snapshot(7),
            Err(SyncError::CheckpointCorruption { .. })
        ));
    }
}
