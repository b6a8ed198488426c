//! Trait contract tests for BackupStore and RunJournal.
//!
//! These tests verify the behavioral contracts of the storage traits
//! using the in-memory fakes. Any conforming implementation must pass these.

use serde_json::json;
use synapse_state::fakes::{MemoryBackupStore, MemoryRunJournal};
use synapse_state::storage_traits::*;
use synapse_state::StorageError;

fn metadata(device: &str) -> RunMetadata {
    RunMetadata {
        device: device.to_string(),
        management_addr: "10.0.0.1".to_string(),
        correlation_id: uuid::Uuid::new_v4().to_string(),
        tags: json!({"source": "contract-test"}),
    }
}

// ===========================================================================
// BackupStore contract tests
// ===========================================================================

#[tokio::test]
async fn backup_save_then_latest_round_trip() {
    let store = MemoryBackupStore::new();
    let snapshot = DeviceSnapshot::capture(
        "spine01",
        json!({"interface": [{"name": "ethernet-1/1"}]}),
        SnapshotSource::PreChange,
    );
    let digest = snapshot.digest.clone();

    store.save(snapshot).await.unwrap();
    let latest = store
        .latest("spine01", SnapshotSource::PreChange)
        .await
        .unwrap();

    assert_eq!(latest.device, "spine01");
    assert_eq!(latest.digest, digest);
}

#[tokio::test]
async fn backup_latest_not_found() {
    let store = MemoryBackupStore::new();
    let err = store
        .latest("unknown", SnapshotSource::PreChange)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::SnapshotNotFound { .. }));
}

#[tokio::test]
async fn backup_last_write_wins() {
    let store = MemoryBackupStore::new();
    let first = DeviceSnapshot::capture("leaf01", json!({"rev": 1}), SnapshotSource::PreChange);
    let second = DeviceSnapshot::capture("leaf01", json!({"rev": 2}), SnapshotSource::PreChange);

    store.save(first).await.unwrap();
    store.save(second).await.unwrap();

    let latest = store
        .latest("leaf01", SnapshotSource::PreChange)
        .await
        .unwrap();
    assert_eq!(latest.payload, json!({"rev": 2}));
}

#[tokio::test]
async fn backup_source_tags_are_independent() {
    let store = MemoryBackupStore::new();
    let pre = DeviceSnapshot::capture("leaf01", json!({"side": "pre"}), SnapshotSource::PreChange);
    let post =
        DeviceSnapshot::capture("leaf01", json!({"side": "post"}), SnapshotSource::PostChange);

    store.save(pre).await.unwrap();
    store.save(post).await.unwrap();

    let pre = store
        .latest("leaf01", SnapshotSource::PreChange)
        .await
        .unwrap();
    let post = store
        .latest("leaf01", SnapshotSource::PostChange)
        .await
        .unwrap();

    assert_eq!(pre.payload, json!({"side": "pre"}));
    assert_eq!(post.payload, json!({"side": "post"}));
}

#[tokio::test]
async fn backup_devices_are_isolated() {
    let store = MemoryBackupStore::new();
    store
        .save(DeviceSnapshot::capture(
            "spine01",
            json!({"device": "spine01"}),
            SnapshotSource::PreChange,
        ))
        .await
        .unwrap();

    let err = store
        .latest("spine02", SnapshotSource::PreChange)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SnapshotNotFound { .. }));
}

#[tokio::test]
async fn backup_digest_matches_payload() {
    let payload = json!({"network-instance": []});
    let snapshot = DeviceSnapshot::capture("spine01", payload.clone(), SnapshotSource::PreChange);

    assert_eq!(snapshot.digest, ContentDigest::from_json(&payload));
}

// ===========================================================================
// RunJournal contract tests
// ===========================================================================

#[tokio::test]
async fn journal_create_starts_accepted() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    let run = journal.get_run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::Accepted);
    assert!(run.result.is_none());
    assert!(run.completed_at.is_none());
}

#[tokio::test]
async fn journal_get_unknown_run_fails() {
    let journal = MemoryRunJournal::new();
    let err = journal.get_run(&RunId::new()).await.unwrap_err();

    assert!(matches!(err, StorageError::RunNotFound { .. }));
}

#[tokio::test]
async fn journal_steps_ordered_by_seq() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    journal
        .record_step(&run_id, StepRecord::completed(2, StepName::Fetch))
        .await
        .unwrap();
    journal
        .record_step(&run_id, StepRecord::completed(1, StepName::Backup))
        .await
        .unwrap();

    let steps = journal.get_steps(&run_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step, StepName::Backup);
    assert_eq!(steps[1].step, StepName::Fetch);
}

#[tokio::test]
async fn journal_advance_rejects_terminal_target() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    let err = journal
        .advance_state(&run_id, RunState::Succeeded)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

#[tokio::test]
async fn journal_finalized_run_is_immutable() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    journal
        .finalize_run(&run_id, RunState::Succeeded, TerminalResult::Succeeded, None)
        .await
        .unwrap();

    let err = journal
        .record_step(&run_id, StepRecord::completed(1, StepName::Backup))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));

    let err = journal
        .advance_state(&run_id, RunState::BackingUp)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

#[tokio::test]
async fn journal_finalize_records_failure_detail() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    let failure = FailureDetail {
        step: StepName::Deploy,
        class: Some(ErrorClass::RejectedPayload),
        reason: FailReason::DeployFailed,
        message: "device refused commit".to_string(),
        rollback_attempted: true,
        rollback_complete: true,
    };
    journal
        .finalize_run(
            &run_id,
            RunState::RolledBack,
            TerminalResult::RolledBack,
            Some(failure.clone()),
        )
        .await
        .unwrap();

    let run = journal.get_run(&run_id).await.unwrap();
    assert_eq!(run.state, RunState::RolledBack);
    assert_eq!(run.result, Some(TerminalResult::RolledBack));
    assert_eq!(run.failure, Some(failure));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn journal_active_run_for_sees_only_non_terminal() {
    let journal = MemoryRunJournal::new();

    let done = journal.create_run(metadata("leaf01")).await.unwrap();
    journal
        .finalize_run(&done, RunState::Failed, TerminalResult::Failed, None)
        .await
        .unwrap();
    assert!(journal.active_run_for("leaf01").await.unwrap().is_none());

    let active = journal.create_run(metadata("leaf01")).await.unwrap();
    journal
        .advance_state(&active, RunState::Deploying)
        .await
        .unwrap();

    let found = journal.active_run_for("leaf01").await.unwrap().unwrap();
    assert_eq!(found.run_id, active);
    assert_eq!(found.state, RunState::Deploying);
}

#[tokio::test]
async fn journal_list_runs_filters_by_device() {
    let journal = MemoryRunJournal::new();
    journal.create_run(metadata("spine01")).await.unwrap();
    journal.create_run(metadata("spine01")).await.unwrap();
    journal.create_run(metadata("leaf01")).await.unwrap();

    let all = journal.list_runs(None).await.unwrap();
    assert_eq!(all.len(), 3);

    let spine = journal.list_runs(Some("spine01")).await.unwrap();
    assert_eq!(spine.len(), 2);
    assert!(spine.iter().all(|r| r.metadata.device == "spine01"));
}

#[tokio::test]
async fn journal_step_failure_detail_survives_round_trip() {
    let journal = MemoryRunJournal::new();
    let run_id = journal.create_run(metadata("spine01")).await.unwrap();

    let failure = StepFailure {
        class: ErrorClass::TransientInfra,
        message: "connect timed out".to_string(),
        attempts: 3,
    };
    journal
        .record_step(&run_id, StepRecord::failed(1, StepName::Backup, failure))
        .await
        .unwrap();

    let steps = journal.get_steps(&run_id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Failed);
    let err = steps[0].error.as_ref().expect("failure detail");
    assert_eq!(err.class, ErrorClass::TransientInfra);
    assert_eq!(err.attempts, 3);
}
