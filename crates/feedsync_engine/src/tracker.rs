//! Per-variant sync state.
//!
//! The tracker remembers, for every exported variant, the revision and the
//! countries of its last completed export, plus the baseline (the last
//! completed run and its fetch watermark). It is written only when a run
//! completes, so a failed or cancelled run never moves it.

use crate::document;
use crate::error::SyncResult;
use feedsync_storage::StateBackend;
use feedsync_types::{
    now_millis, CountryCode, CountrySet, Revision, RunId, SourceVariant, VariantId, VariantRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const KEY: &str = "variants.json";

/// The completed run incremental syncs build on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Run that established the baseline.
    pub run_id: RunId,
    /// Highest source revision that run observed.
    pub watermark: Revision,
    /// Unix milliseconds of the commit.
    pub committed_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TrackerDocument {
    #[serde(default)]
    baseline: Option<Baseline>,
    #[serde(default)]
    variants: BTreeMap<VariantId, VariantRecord>,
}

/// One variant's state after a completed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantCommit {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Revision that was exported.
    pub revision: Revision,
    /// Countries it now belongs to. Replaces the stored set.
    pub countries: CountrySet,
}

/// Summary of the tracked state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Tracked variants.
    pub variants: usize,
    /// Tracked variants per country.
    pub per_country: BTreeMap<CountryCode, usize>,
    /// Current baseline, if any.
    pub baseline: Option<Baseline>,
}

/// Durable per-variant sync state.
#[derive(Clone)]
pub struct VariantStateTracker {
    backend: Arc<dyn StateBackend>,
}

impl VariantStateTracker {
    /// Creates a tracker stored in `backend`.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    fn load(&self) -> SyncResult<TrackerDocument> {
        Ok(document::load(self.backend.as_ref(), KEY)?.unwrap_or_default())
    }

    /// The baseline of the last completed run, if any.
    pub fn baseline(&self) -> SyncResult<Option<Baseline>> {
        Ok(self.load()?.baseline)
    }

    /// True once a run has completed and committed its state.
    pub fn has_baseline(&self) -> SyncResult<bool> {
        Ok(self.baseline()?.is_some())
    }

    /// Highest revision observed by the last completed run.
    pub fn high_watermark(&self) -> SyncResult<Option<Revision>> {
        Ok(self.baseline()?.map(|b| b.watermark))
    }

    /// Stored state of one variant.
    pub fn record(&self, variant_id: &VariantId) -> SyncResult<Option<VariantRecord>> {
        Ok(self.load()?.variants.remove(variant_id))
    }

    /// Filters `variants` down to those changed since the last export.
    ///
    /// With `since = None` every variant passes. Otherwise a tracked variant
    /// passes when its revision is newer than the recorded one, and an
    /// untracked variant when its revision is newer than `since`.
    ///
    /// The stored state is read once, up front; consuming the iterator
    /// writes nothing, so the same input always yields the same output
    /// until a later commit.
    pub fn filter_changed<I>(
        &self,
        variants: I,
        since: Option<Revision>,
    ) -> SyncResult<FilterChanged<I::IntoIter>>
    where
        I: IntoIterator<Item = SourceVariant>,
    {
        let records = match since {
            Some(_) => self.load()?.variants,
            None => BTreeMap::new(),
        };
        Ok(FilterChanged {
            inner: variants.into_iter(),
            records,
            since,
        })
    }

    /// Upserts one variant without touching the baseline.
    pub fn commit(
        &self,
        variant_id: VariantId,
        revision: Revision,
        countries: CountrySet,
    ) -> SyncResult<()> {
        let commit = VariantCommit {
            variant_id,
            revision,
            countries,
        };
        self.apply(std::slice::from_ref(&commit), None)?;
        Ok(())
    }

    /// Records a completed run: upserts every commit and moves the baseline
    /// to `run_id` and `watermark`.
    ///
    /// Idempotent: repeating the call with the same arguments writes
    /// nothing. Returns true if the stored state changed.
    pub fn commit_run(
        &self,
        run_id: &RunId,
        commits: &[VariantCommit],
        watermark: Revision,
    ) -> SyncResult<bool> {
        let changed = self.apply(commits, Some((run_id, watermark)))?;
        if changed {
            info!(
                "variant state committed for run {run_id}: {} variants, watermark {watermark}",
                commits.len()
            );
        }
        Ok(changed)
    }

    fn apply(
        &self,
        commits: &[VariantCommit],
        baseline: Option<(&RunId, Revision)>,
    ) -> SyncResult<bool> {
        let current = self.load()?;
        let mut next = current.clone();

        for commit in commits {
            // Variants never exported to any country are not tracked
            if commit.countries.is_empty() && !next.variants.contains_key(&commit.variant_id) {
                continue;
            }
            next.variants.insert(
                commit.variant_id.clone(),
                VariantRecord {
                    variant_id: commit.variant_id.clone(),
                    last_synced_revision: commit.revision,
                    last_seen_countries: commit.countries.clone(),
                },
            );
        }

        if let Some((run_id, watermark)) = baseline {
            let watermark = current
                .baseline
                .as_ref()
                .map_or(watermark, |b| b.watermark.max(watermark));
            let unchanged = current
                .baseline
                .as_ref()
                .is_some_and(|b| &b.run_id == run_id && b.watermark == watermark);
            if !unchanged {
                next.baseline = Some(Baseline {
                    run_id: run_id.clone(),
                    watermark,
                    committed_at: now_millis(),
                });
            }
        }

        if next == current {
            debug!("variant state unchanged; skipping write");
            return Ok(false);
        }
        document::store(self.backend.as_ref(), KEY, &next)?;
        Ok(true)
    }

    /// Drops every record and the baseline.
    pub fn reset(&self) -> SyncResult<bool> {
        Ok(self.backend.remove(KEY)?)
    }

    /// Counts tracked variants overall and per country.
    pub fn stats(&self) -> SyncResult<TrackerStats> {
        let doc = self.load()?;
        let mut per_country = BTreeMap::new();
        for record in doc.variants.values() {
            for country in &record.last_seen_countries {
                *per_country.entry(country.clone()).or_insert(0) += 1;
            }
        }
        Ok(TrackerStats {
            variants: doc.variants.len(),
            per_country,
            baseline: doc.baseline,
        })
    }
}

/// Iterator returned by [`VariantStateTracker::filter_changed`].
pub struct FilterChanged<I> {
    inner: I,
    records: BTreeMap<VariantId, VariantRecord>,
    since: Option<Revision>,
}

impl<I> FilterChanged<I> {
    fn is_changed(&self, variant: &SourceVariant) -> bool {
        let Some(since) = self.since else {
            return true;
        };
        match self.records.get(&variant.variant_id) {
            Some(record) => variant.revision > record.last_synced_revision,
            None => variant.revision > since,
        }
    }
}

impl<I> Iterator for FilterChanged<I>
where
    I: Iterator<Item = SourceVariant>,
{
    type Item = SourceVariant;

    fn next(&mut self) -> Option<SourceVariant> {
        loop {
            let variant = self.inner.next()?;
            if self.is_changed(&variant) {
                return Some(variant);
            }
        }
    }
}
