//! Interrupted runs: failures, crashes, cancellation and restarts.

use feedsync_engine::{RetryPolicy, SyncConfig, SyncError};
use feedsync_testkit::prelude::*;
use feedsync_types::{Classification, Revision, RunId};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn seed(h: Harness) -> Harness {
    h.seeded(
        vec![
            variant("v1", 10, &["loc1"]),
            variant("v2", 11, &["loc2"]),
            variant("v3", 12, &["loc3"]),
        ],
        mapping(&[
            ("loc1", &["US"]),
            ("loc2", &["US", "CA"]),
            ("loc3", &["GB"]),
        ]),
    )
}

fn harness() -> Harness {
    seed(Harness::memory())
}

#[test]
fn resume_after_fetch_does_not_refetch() {
    let h = harness();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);

    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.last_completed, Some(Phase::DataFetched));
    assert_eq!(h.catalog.calls(), 1);

    let summary = h.orchestrator().resume().unwrap();

    assert!(summary.resumed);
    assert_eq!(Some(summary.run_id), failure.run_id);
    assert_eq!(summary.strategy, Strategy::Full);
    assert_eq!(summary.fetched, 3);
    assert_eq!(h.catalog.calls(), 1);
    // CA and GB were exported before the failure and are not written again
    assert_eq!(h.feeds.writes_for(&country("CA")).len(), 1);
    assert_eq!(h.feeds.writes_for(&country("GB")).len(), 1);
    assert_eq!(h.feeds.writes_for(&country("US")).len(), 1);
}

#[test]
fn smart_run_resumes_with_the_original_strategy() {
    let h = harness();
    h.orchestrator().run(None).unwrap();

    h.catalog.upsert(variant("v2", 20, &["loc2"]));
    h.uploads.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.strategy, Some(Strategy::Incremental));
    assert_eq!(failure.last_completed, Some(Phase::FeedsExported));

    // A MAJOR change meanwhile does not alter the interrupted run
    h.mapping.set(mapping(&[("loc1", &["US"]), ("loc2", &["US"])]));
    let summary = h.orchestrator().run(None).unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.strategy, Strategy::Incremental);
    assert_eq!(h.mapping.calls(), 2);
}

#[test]
fn partial_upload_resumes_with_remaining_feeds() {
    let h = harness().with_config(fast_config().with_max_concurrent_uploads(1));
    h.uploads.fail_country(&country("GB"), Fault::Permanent, 1);

    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.last_completed, Some(Phase::FeedsExported));
    let active = h.orchestrator().checkpoints().active().unwrap().unwrap();
    assert_eq!(active.artifacts.uploaded.len(), 1);

    let summary = h.orchestrator().resume().unwrap();

    assert_eq!(summary.uploaded, 3);
    let files: Vec<_> = ["CA", "GB", "US"]
        .iter()
        .map(|c| FakeFeedWriter::file_for(&country(c)))
        .collect();
    assert_eq!(h.uploads.uploads(), files);
}

#[test]
fn failed_orphan_cleanup_does_not_repeat_uploads() {
    let h = harness();
    h.uploads.fail_orphan_cleanup(Fault::Permanent, 1);

    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.last_completed, Some(Phase::FeedsExported));

    let summary = h.orchestrator().resume().unwrap();
    assert_eq!(summary.uploaded, 3);
    assert_eq!(h.uploads.uploads().len(), 3);
    assert_eq!(h.uploads.orphan_calls().len(), 2);
}

#[test]
fn crash_before_fetch_commit_refetches_on_resume() {
    let h = harness();
    let store = Arc::new(FlakyCheckpointStore::new(h.checkpoint_store()));
    // Commit 1 records MAPPING_RESOLVED, commit 2 DATA_FETCHED
    store.fail_commit(2);

    let failure = h
        .orchestrator_with_store(store.clone())
        .run(None)
        .unwrap_err();
    assert!(matches!(failure.error, SyncError::Storage(_)));
    assert_eq!(failure.last_completed, Some(Phase::MappingResolved));

    let summary = h.orchestrator().resume().unwrap();
    assert_eq!(summary.run_id, failure.run_id.unwrap());
    assert_eq!(h.catalog.calls(), 2);
    assert_eq!(summary.fetched, 3);
}

#[test]
fn crash_before_completion_keeps_tracker_consistent() {
    let h = harness();
    let store = Arc::new(FlakyCheckpointStore::new(h.checkpoint_store()));
    // MAPPING_RESOLVED, DATA_FETCHED, three export progress commits,
    // FEEDS_EXPORTED, one upload batch, UPLOAD_COMPLETE, then completion
    store.fail_commit(9);

    let failure = h
        .orchestrator_with_store(store.clone())
        .run(None)
        .unwrap_err();
    assert_eq!(failure.last_completed, Some(Phase::UploadComplete));
    assert_eq!(store.commits(), 9);

    let summary = h.orchestrator().run(None).unwrap();
    assert!(summary.resumed);
    assert_eq!(h.uploads.uploads().len(), 3);
    assert_eq!(h.catalog.calls(), 1);

    let tracker = h.orchestrator();
    let baseline = tracker.tracker().baseline().unwrap().unwrap();
    assert_eq!(baseline.run_id, summary.run_id);
    assert_eq!(baseline.watermark, Revision(12));
}

#[test]
fn failed_run_leaves_tracker_untouched() {
    let h = harness();
    let first = h.orchestrator().run(None).unwrap();

    h.catalog.upsert(variant("v2", 20, &["loc2"]));
    h.uploads.fail_country(&country("US"), Fault::Permanent, 1);
    h.orchestrator().run(None).unwrap_err();

    let orchestrator = h.orchestrator();
    let record = orchestrator.tracker().record(&variant_id("v2")).unwrap().unwrap();
    assert_eq!(record.last_synced_revision, Revision(11));
    assert_eq!(
        orchestrator.tracker().baseline().unwrap().unwrap().run_id,
        first.run_id
    );

    orchestrator.resume().unwrap();
    let record = orchestrator.tracker().record(&variant_id("v2")).unwrap().unwrap();
    assert_eq!(record.last_synced_revision, Revision(20));
}

#[test]
fn explicit_incremental_refuses_an_active_run() {
    let h = harness();
    h.orchestrator().run(None).unwrap();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    h.catalog.upsert(variant("v1", 30, &["loc1"]));
    let failure = h.orchestrator().run(None).unwrap_err();

    let conflict = h.orchestrator().run(Some(Strategy::Incremental)).unwrap_err();
    match conflict.error {
        SyncError::ActiveRunConflict { run_id } => assert_eq!(Some(run_id), failure.run_id),
        other => panic!("expected an active run conflict, got {other}"),
    }
}

#[test]
fn explicit_full_supersedes_an_active_run() {
    let h = harness();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let first = h.orchestrator().run(None).unwrap_err();
    let first_id = first.run_id.unwrap();

    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let second = h.orchestrator().run(Some(Strategy::Full)).unwrap_err();
    let second_id = second.run_id.unwrap();
    assert_ne!(first_id, second_id);

    let orchestrator = h.orchestrator();
    let abandoned = orchestrator.checkpoints().load(&first_id).unwrap().unwrap();
    assert_eq!(abandoned.run.status, RunStatus::Abandoned);
    let active = orchestrator.checkpoints().active().unwrap().unwrap();
    assert_eq!(active.run.run_id, second_id);

    let summary = orchestrator.resume().unwrap();
    assert_eq!(summary.run_id, second_id);
    // Finished runs other than the latest are pruned on completion
    assert!(orchestrator.checkpoints().load(&first_id).unwrap().is_none());
}

#[test]
fn corrupted_checkpoint_is_reported_and_clearable() {
    let h = harness();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();
    let run_id = failure.run_id.unwrap();

    h.backend
        .write(&format!("checkpoints/{run_id}.json"), b"{\"format\":1,")
        .unwrap();

    let err = h.orchestrator().resume().unwrap_err();
    assert!(matches!(err.error, SyncError::CheckpointCorruption { .. }));

    assert_eq!(h.orchestrator().clear_checkpoint(Some(&run_id)).unwrap(), run_id);
    assert!(h.backend.list("spool/").unwrap().is_empty());

    let summary = h.orchestrator().run(None).unwrap();
    assert_eq!(summary.strategy, Strategy::Full);
    assert!(!summary.resumed);
}

/// Drops CA from loc2, a MAJOR change.
fn drop_canada(h: &Harness) {
    h.mapping.set(mapping(&[
        ("loc1", &["US"]),
        ("loc2", &["US"]),
        ("loc3", &["GB"]),
    ]));
}

#[test]
fn clearing_an_unfinished_rebuild_keeps_the_next_run_full() {
    let h = harness();
    h.orchestrator().run(None).unwrap();
    let ca = FakeUploader::remote_id_for(&FakeFeedWriter::file_for(&country("CA")));
    assert!(h.uploads.remote_ids().contains(&ca));

    drop_canada(&h);
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.strategy, Some(Strategy::Full));
    assert_eq!(failure.last_completed, Some(Phase::DataFetched));

    h.orchestrator().clear_checkpoint(None).unwrap();
    let summary = h.orchestrator().run(None).unwrap();

    assert_eq!(summary.strategy, Strategy::Full);
    assert!(!summary.resumed);
    assert_eq!(summary.orphans_removed, 1);
    assert!(!h.uploads.remote_ids().contains(&ca));
}

#[test]
fn clearing_an_unfinished_incremental_run_forces_full() {
    let h = harness();
    h.orchestrator().run(None).unwrap();

    h.catalog.upsert(variant("v1", 30, &["loc1"]));
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();
    assert_eq!(failure.strategy, Some(Strategy::Incremental));

    h.orchestrator().clear_checkpoint(None).unwrap();
    let summary = h.orchestrator().run(None).unwrap();
    assert_eq!(summary.strategy, Strategy::Full);
    assert_eq!(summary.fetched, 3);
}

#[test]
fn major_change_survives_a_run_that_failed_to_start() {
    let h = harness();
    h.orchestrator().run(None).unwrap();

    drop_canada(&h);
    let store = Arc::new(FlakyCheckpointStore::new(h.checkpoint_store()));
    store.fail_commit(1);
    let failure = h.orchestrator_with_store(store).run(None).unwrap_err();
    assert_eq!(failure.run_id, None);

    let summary = h.orchestrator().run(None).unwrap();
    assert_eq!(summary.strategy, Strategy::Full);
    assert_eq!(summary.classification, Some(Classification::Major));
    assert_eq!(summary.orphans_removed, 1);
}

#[test]
fn expansions_survive_a_run_that_failed_to_start() {
    let h = harness();
    h.orchestrator().run(None).unwrap();

    h.mapping.set(mapping(&[
        ("loc1", &["US", "DE"]),
        ("loc2", &["US", "CA"]),
        ("loc3", &["GB"]),
    ]));
    let store = Arc::new(FlakyCheckpointStore::new(h.checkpoint_store()));
    store.fail_commit(1);
    h.orchestrator_with_store(store).run(None).unwrap_err();

    let summary = h.orchestrator().run(None).unwrap();
    assert_eq!(summary.strategy, Strategy::Incremental);
    assert_eq!(summary.classification, Some(Classification::Minor));
    assert_eq!(h.feeds.feed(&country("DE")), vec![variant_id("v1")]);
}

#[test]
fn corrupted_variant_state_is_reported() {
    let h = harness();
    h.backend.write("variants.json", b"not json").unwrap();

    let failure = h.orchestrator().run(None).unwrap_err();
    match failure.error {
        SyncError::CheckpointCorruption { key, .. } => assert_eq!(key, "variants.json"),
        other => panic!("expected corruption, got {other}"),
    }
    assert_eq!(failure.run_id, None);
}

#[test]
fn clear_checkpoint_defaults_to_the_active_run() {
    let h = harness();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();

    let orchestrator = h.orchestrator();
    let cleared = orchestrator.clear_checkpoint(None).unwrap();
    assert_eq!(Some(cleared), failure.run_id);
    assert!(orchestrator.checkpoints().active().unwrap().is_none());
    assert!(h.backend.list("spool/").unwrap().is_empty());

    assert!(matches!(
        orchestrator.clear_checkpoint(None),
        Err(SyncError::NoActiveRun)
    ));
    let unknown = RunId::new("no-such-run").unwrap();
    assert!(matches!(
        orchestrator.clear_checkpoint(Some(&unknown)),
        Err(SyncError::UnknownRun(_))
    ));
}

#[test]
fn maintenance_refuses_while_a_run_is_active() {
    let h = harness();
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    h.orchestrator().run(None).unwrap_err();

    let orchestrator = h.orchestrator();
    assert!(matches!(
        orchestrator.clear_cache(),
        Err(SyncError::ActiveRunConflict { .. })
    ));
    assert!(matches!(
        orchestrator.refresh_mapping(),
        Err(SyncError::ActiveRunConflict { .. })
    ));
}

#[test]
fn resume_without_active_run_fails() {
    let h = harness();
    let failure = h.orchestrator().resume().unwrap_err();
    assert!(matches!(failure.error, SyncError::NoActiveRun));
    assert_eq!(failure.run_id, None);
}

#[test]
fn cancellation_before_a_run_writes_nothing() {
    let h = harness();
    let orchestrator = h.orchestrator();
    orchestrator.cancel_token().cancel();

    let failure = orchestrator.run(None).unwrap_err();
    assert!(failure.error.is_cancelled());
    assert_eq!(failure.run_id, None);
    assert!(orchestrator.checkpoints().list().unwrap().is_empty());

    orchestrator.cancel_token().reset();
    assert!(orchestrator.run(None).is_ok());
}

#[test]
fn cancellation_interrupts_backoff() {
    let h = harness().with_config(
        SyncConfig::new().with_retry(RetryPolicy::new(3, Duration::from_secs(10)).without_jitter()),
    );
    h.catalog.fail_next(Fault::Transient, 1);
    let orchestrator = h.orchestrator();
    let token = orchestrator.cancel_token();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let started = Instant::now();
    let failure = orchestrator.run(None).unwrap_err();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(failure.error, SyncError::Cancelled));
    assert_eq!(failure.last_completed, Some(Phase::MappingResolved));

    let summary = h.orchestrator().resume().unwrap();
    assert!(summary.resumed);
    assert_eq!(h.catalog.calls(), 2);
}

#[test]
fn state_survives_a_restart() {
    let h = seed(Harness::on_disk());
    h.feeds.fail_country(&country("US"), Fault::Permanent, 1);
    let failure = h.orchestrator().run(None).unwrap_err();

    let h = h.reopen();
    let summary = h.orchestrator().resume().unwrap();

    assert_eq!(Some(summary.run_id), failure.run_id);
    assert_eq!(h.catalog.calls(), 1);
    assert!(h.orchestrator().tracker().has_baseline().unwrap());

    let next = h.orchestrator().run(None).unwrap();
    assert_eq!(next.strategy, Strategy::Incremental);
    assert_eq!(next.fetched, 0);
}
