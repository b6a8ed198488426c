//! Integration tests for the change orchestrator with in-memory fakes.
//!
//! Covers the end-to-end scenarios: a clean run, a hygiene rejection, a
//! convergence-triggered rollback, the busy rule, an incomplete rollback,
//! cancellation windows, and crash-resume.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use synapse_core::fakes::{FakeDeviceGateway, FakeSotClient, StaticRenderer};
use synapse_core::{
    CancelDecision, ChangeOrchestrator, ChangeRequest, ConfigRenderer, DeviceIntent, ErrorClass,
    FailReason, GatewayError, PipelineError, PipelinePolicy, RunState, SnapshotSource, SotError,
    SrlConfigRenderer, StepName, StepStatus, TerminalResult,
};
use synapse_state::fakes::{MemoryBackupStore, MemoryRunJournal};
use synapse_state::{BackupStore, RunJournal};

const MGMT: &str = "172.20.20.11";

fn spine_intent() -> DeviceIntent {
    DeviceIntent {
        hostname: "spine01".to_string(),
        management_addr: MGMT.to_string(),
        asn: 64512,
        router_id: "10.10.10.1".to_string(),
        interfaces: vec![
            synapse_core::InterfaceIntent {
                name: "ethernet-1/1".to_string(),
                description: "to leaf01".to_string(),
                mtu: 9214,
                address: Some("10.0.0.0/31".to_string()),
                enabled: true,
            },
            synapse_core::InterfaceIntent {
                name: "system0".to_string(),
                description: "loopback".to_string(),
                mtu: 9214,
                address: Some("10.10.10.1/32".to_string()),
                enabled: true,
            },
        ],
        bgp_sessions: vec![synapse_core::BgpSessionIntent {
            description: "spine01 to leaf01".to_string(),
            local_asn: 64512,
            remote_asn: 64513,
            local_ip: "10.0.0.0/31".to_string(),
            remote_ip: "10.0.0.1/31".to_string(),
            peer_group: "underlay".to_string(),
        }],
    }
}

fn baseline_config() -> Value {
    json!({"hostname": "spine01", "generation": "baseline"})
}

fn established_sessions() -> Value {
    json!([{"peer-address": "10.0.0.1", "session-state": "established"}])
}

fn idle_sessions() -> Value {
    json!([{"peer-address": "10.0.0.1", "session-state": "idle"}])
}

struct World {
    orchestrator: Arc<ChangeOrchestrator>,
    journal: Arc<MemoryRunJournal>,
    backups: Arc<MemoryBackupStore>,
    gateway: Arc<FakeDeviceGateway>,
    sot: Arc<FakeSotClient>,
}

fn world_with_renderer(renderer: Arc<dyn ConfigRenderer>) -> World {
    let journal = Arc::new(MemoryRunJournal::new());
    let backups = Arc::new(MemoryBackupStore::new());
    let gateway = Arc::new(FakeDeviceGateway::new(baseline_config()));
    gateway.set_oper_default(established_sessions());
    let sot = Arc::new(FakeSotClient::new().with_intent(spine_intent(), "v1"));

    let orchestrator = Arc::new(
        ChangeOrchestrator::new(
            journal.clone(),
            backups.clone(),
            gateway.clone(),
            sot.clone(),
            renderer,
        )
        .with_policy(PipelinePolicy::immediate()),
    );

    World {
        orchestrator,
        journal,
        backups,
        gateway,
        sot,
    }
}

fn world() -> World {
    world_with_renderer(Arc::new(SrlConfigRenderer::new()))
}

/// Scenario A: valid intended state runs to `Succeeded` with exactly the
/// seven steps in order and a passing hygiene report.
#[tokio::test]
async fn successful_run_walks_all_seven_steps() {
    let w = world();

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Succeeded);
    assert_eq!(run.record.result, Some(TerminalResult::Succeeded));
    assert!(run.record.failure.is_none());

    assert_eq!(
        run.step_names(),
        vec![
            StepName::Backup,
            StepName::Fetch,
            StepName::Render,
            StepName::HygieneGate,
            StepName::Deploy,
            StepName::Validate,
            StepName::UpdateStatus,
        ],
        "step log must show exactly the 7 steps in order"
    );
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Completed));

    let report = run.hygiene_report().expect("gate report recorded");
    assert!(report.pass);

    // one deploy write, no rollback write
    assert_eq!(w.gateway.write_count(), 1);

    // the source of truth heard about the success
    let updates = w.sot.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "spine01");
    assert_eq!(updates[0].1.outcome, TerminalResult::Succeeded);
}

/// Backup-precedes-deploy property: the pre-change snapshot exists and was
/// captured before the deploy attempt.
#[tokio::test]
async fn backup_precedes_deploy() {
    let w = world();

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    let pre = w
        .backups
        .latest("spine01", SnapshotSource::PreChange)
        .await
        .expect("pre-change snapshot");
    assert_eq!(pre.payload, baseline_config());

    let backup = run.step(StepName::Backup).expect("backup step");
    let deploy = run.step(StepName::Deploy).expect("deploy step");
    assert!(backup.seq < deploy.seq);
    assert!(backup.recorded_at <= deploy.recorded_at);

    // post-change read-back captured after successful validation
    let post = w
        .backups
        .latest("spine01", SnapshotSource::PostChange)
        .await
        .expect("post-change snapshot");
    assert_ne!(post.payload, baseline_config());
}

/// Scenario B: an empty BGP peer group is a blocking violation; the
/// pipeline fails at the gate and never touches the device.
#[tokio::test]
async fn empty_peer_group_blocks_before_any_write() {
    let payload = json!({
        "interface": [
            {"name": "ethernet-1/1", "description": "to leaf01", "admin-state": "enable", "mtu": 9214}
        ],
        "network-instance": [
            {
                "name": "default",
                "interface": [],
                "protocols": {
                    "bgp": {
                        "autonomous-system": 64512,
                        "router-id": "10.10.10.1",
                        "group": [{"group-name": "underlay", "description": "fabric"}],
                        "neighbor": []
                    }
                }
            }
        ]
    });
    let w = world_with_renderer(Arc::new(StaticRenderer::new(payload)));

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Failed);
    assert_eq!(run.record.result, Some(TerminalResult::Failed));

    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.reason, FailReason::HygieneRejected);
    assert_eq!(failure.class, Some(ErrorClass::HygieneViolation));
    assert!(!failure.rollback_attempted);

    let report = run.hygiene_report().expect("gate report");
    assert_eq!(report.blocking_count(), 1);
    assert!(report
        .violations
        .iter()
        .any(|v| v.rule == "empty-peer-group"));

    // the hard gate: writeConfig is never called
    assert_eq!(w.gateway.write_count(), 0);
}

/// Scenario C: the deploy lands but BGP never converges; the pipeline rolls
/// the pre-change snapshot back and terminates `Rolled-Back`.
#[tokio::test]
async fn convergence_timeout_triggers_rollback() {
    let w = world();
    w.gateway.set_oper_default(idle_sessions());

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::RolledBack);
    assert_eq!(run.record.result, Some(TerminalResult::RolledBack));

    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.step, StepName::Validate);
    assert_eq!(failure.reason, FailReason::ConvergenceTimeout);
    assert!(failure.rollback_attempted);
    assert!(failure.rollback_complete);

    // two writes: the deploy, then the pre-change snapshot going back
    let writes = w.gateway.write_payloads();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1], baseline_config());
    assert_eq!(w.gateway.running_config(), baseline_config());

    let rollback = run.step(StepName::Rollback).expect("rollback step");
    assert_eq!(rollback.status, StepStatus::Completed);

    let validate = run.step(StepName::Validate).expect("validate step");
    assert_eq!(validate.status, StepStatus::Failed);
    assert_eq!(
        validate.error.as_ref().map(|e| e.class),
        Some(ErrorClass::ConvergenceTimeout)
    );
}

/// Scenario D: a second request for a device with an in-flight run is
/// rejected with `busy` and no second run is created.
#[tokio::test]
async fn second_request_for_busy_device_is_rejected() {
    let w = world();
    w.gateway.hold_writes();

    let run_id = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("submit");

    let driver = {
        let orchestrator = w.orchestrator.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { orchestrator.drive(&run_id).await })
    };

    // wait until the run is mid-deploy
    loop {
        let status = w.orchestrator.run_status(&run_id).await.expect("status");
        if status.record.state == RunState::Deploying {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let err = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect_err("second submission must be rejected");
    assert!(matches!(err, PipelineError::Busy { ref device } if device == "spine01"));

    // no second run was created
    assert_eq!(w.journal.list_runs(Some("spine01")).await.unwrap().len(), 1);

    w.gateway.release_writes();
    let run = driver.await.expect("join").expect("drive");
    assert_eq!(run.record.state, RunState::Succeeded);

    // once terminal, the device is free again
    w.orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("device released after terminal state");
}

/// At-most-one is per device: a submission for a different device is
/// accepted while another device's run is in flight.
#[tokio::test]
async fn different_devices_do_not_contend() {
    let w = world();

    let spine = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("spine submit");
    let leaf = w
        .orchestrator
        .submit(ChangeRequest::new("leaf01", "172.20.20.12"))
        .await
        .expect("leaf submit accepted while spine in flight");
    assert_ne!(spine, leaf);

    // but the busy rule still holds per device
    let err = w
        .orchestrator
        .submit(ChangeRequest::new("leaf01", "172.20.20.12"))
        .await
        .expect_err("leaf is busy");
    assert!(matches!(err, PipelineError::Busy { .. }));
}

/// Scenario E: the rollback write itself fails after exhausting retries;
/// the run ends `Rolled-Back` flagged rollback-incomplete.
#[tokio::test]
async fn failed_rollback_write_is_flagged_incomplete() {
    let w = world();
    w.gateway.set_oper_default(idle_sessions());
    // Hold the deploy write so the rollback errors can be queued after it
    // has claimed its (clean) outcome; the fake claims scripted errors at
    // call entry.
    w.gateway.hold_writes();

    let run_id = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("submit");
    let driver = {
        let orchestrator = w.orchestrator.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { orchestrator.drive(&run_id).await })
    };
    loop {
        let status = w.orchestrator.run_status(&run_id).await.expect("status");
        if status.record.state == RunState::Deploying {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // deploy write is held in flight; every rollback attempt will fail
    for _ in 0..3 {
        w.gateway
            .push_write_error(GatewayError::Unreachable("mgmt link down".into()));
    }
    w.gateway.release_writes();
    let run = driver.await.expect("join").expect("drive");

    // the device was left on the deployed payload: rollback never landed
    assert_eq!(w.gateway.running_config(), w.gateway.write_payloads()[0]);

    assert_eq!(run.record.state, RunState::RolledBack);
    assert_eq!(run.record.result, Some(TerminalResult::RolledBack));

    let failure = run.record.failure.as_ref().expect("failure detail");
    assert!(failure.rollback_attempted);
    assert!(!failure.rollback_complete, "must be flagged rollback-incomplete");
    assert_eq!(failure.class, Some(ErrorClass::RollbackFailure));

    let rollback = run.step(StepName::Rollback).expect("rollback step");
    assert_eq!(rollback.status, StepStatus::Failed);
    let err = rollback.error.as_ref().expect("rollback failure");
    assert_eq!(err.class, ErrorClass::RollbackFailure);
    assert_eq!(err.attempts, 3);
}

/// Backup failure after retries fails the run before anything is written.
#[tokio::test]
async fn unreachable_device_fails_backup_with_retries_spent() {
    let w = world();
    for _ in 0..3 {
        w.gateway
            .push_read_error(GatewayError::Timeout("no answer".into()));
    }

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Failed);
    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.step, StepName::Backup);
    assert_eq!(failure.reason, FailReason::BackupUnreachable);
    assert_eq!(failure.class, Some(ErrorClass::TransientInfra));

    let backup = run.step(StepName::Backup).expect("backup step");
    assert_eq!(backup.error.as_ref().map(|e| e.attempts), Some(3));
    assert_eq!(w.gateway.write_count(), 0);
}

/// Unknown device in the source of truth fails the fetch step without
/// retry.
#[tokio::test]
async fn unknown_device_fails_fetch() {
    let w = world();

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("leaf99", "172.20.20.99"))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Failed);
    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.step, StepName::Fetch);
    assert_eq!(failure.reason, FailReason::IntentUnavailable);

    let fetch = run.step(StepName::Fetch).expect("fetch step");
    assert_eq!(fetch.error.as_ref().map(|e| e.attempts), Some(1));
}

/// A transient source-of-truth fault is retried transparently.
#[tokio::test]
async fn transient_fetch_fault_is_retried() {
    let w = world();
    w.sot
        .push_fetch_error(SotError::Unreachable("conn refused".into()));

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Succeeded);
    let fetch = run.step(StepName::Fetch).expect("fetch step");
    assert_eq!(fetch.detail["attempts"], json!(2));
}

/// Render errors are deterministic: the run fails immediately.
#[tokio::test]
async fn render_error_fails_the_run() {
    let w = world_with_renderer(Arc::new(StaticRenderer::failing("template exploded")));

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Failed);
    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.step, StepName::Render);
    assert_eq!(failure.reason, FailReason::RenderError);
    assert_eq!(w.gateway.write_count(), 0);
}

/// A status-update failure never demotes a successful run.
#[tokio::test]
async fn status_update_failure_does_not_mask_success() {
    let w = world();
    for _ in 0..3 {
        w.sot
            .push_status_error(SotError::Unreachable("graph down".into()));
    }

    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("pipeline run");

    assert_eq!(run.record.state, RunState::Succeeded);
    assert_eq!(run.record.result, Some(TerminalResult::Succeeded));

    let update = run.step(StepName::UpdateStatus).expect("update step");
    assert_eq!(update.status, StepStatus::Failed);
    assert!(w.sot.updates().is_empty());
}

/// Cancellation in a pre-deploy state is accepted and the run terminates
/// without touching the device.
#[tokio::test]
async fn cancel_before_deploy_is_accepted() {
    let w = world();

    let run_id = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("submit");

    let decision = w
        .orchestrator
        .request_cancel(&run_id)
        .await
        .expect("cancel request");
    assert_eq!(decision, CancelDecision::Accepted);

    let run = w.orchestrator.drive(&run_id).await.expect("drive");
    assert_eq!(run.record.state, RunState::Failed);
    let failure = run.record.failure.as_ref().expect("failure detail");
    assert_eq!(failure.reason, FailReason::Cancelled);
    assert!(failure.class.is_none());

    assert_eq!(run.steps.len(), 1);
    assert_eq!(run.steps[0].status, StepStatus::Cancelled);
    assert_eq!(w.gateway.write_count(), 0);
}

/// Cancellation during deployment is rejected; the run goes on to a
/// terminal state.
#[tokio::test]
async fn cancel_during_deploy_is_rejected() {
    let w = world();
    w.gateway.hold_writes();

    let run_id = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("submit");
    let driver = {
        let orchestrator = w.orchestrator.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { orchestrator.drive(&run_id).await })
    };
    loop {
        let status = w.orchestrator.run_status(&run_id).await.expect("status");
        if status.record.state == RunState::Deploying {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let decision = w
        .orchestrator
        .request_cancel(&run_id)
        .await
        .expect("cancel request");
    assert!(matches!(decision, CancelDecision::Rejected { .. }));

    w.gateway.release_writes();
    let run = driver.await.expect("join").expect("drive");
    assert_eq!(run.record.state, RunState::Succeeded);
}

/// An interrupted driver can be re-entered: the second `drive` resumes at
/// the persisted state and completes without duplicating recorded steps.
#[tokio::test]
async fn interrupted_run_resumes_from_persisted_state() {
    let w = world();
    w.gateway.hold_writes();

    let run_id = w
        .orchestrator
        .submit(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("submit");
    let driver = {
        let orchestrator = w.orchestrator.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { orchestrator.drive(&run_id).await })
    };
    loop {
        let status = w.orchestrator.run_status(&run_id).await.expect("status");
        if status.record.state == RunState::Deploying {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // simulate a crash mid-deploy
    driver.abort();
    assert!(driver.await.unwrap_err().is_cancelled());

    let status = w.orchestrator.run_status(&run_id).await.expect("status");
    assert_eq!(status.record.state, RunState::Deploying);

    w.gateway.release_writes();
    let run = w.orchestrator.drive(&run_id).await.expect("resume drive");

    assert_eq!(run.record.state, RunState::Succeeded);
    assert_eq!(
        run.step_names(),
        vec![
            StepName::Backup,
            StepName::Fetch,
            StepName::Render,
            StepName::HygieneGate,
            StepName::Deploy,
            StepName::Validate,
            StepName::UpdateStatus,
        ],
        "resume must not duplicate already-recorded steps"
    );
}

/// No-deploy-without-gate-pass property: any run that reached `Succeeded`
/// or `Rolled-Back` carries a gate report with zero blocking violations.
#[tokio::test]
async fn terminal_deployed_runs_always_passed_the_gate() {
    // succeeded run
    let w = world();
    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("run");
    assert_eq!(run.hygiene_report().expect("report").blocking_count(), 0);

    // rolled-back run
    let w = world();
    w.gateway.set_oper_default(idle_sessions());
    let run = w
        .orchestrator
        .execute(ChangeRequest::new("spine01", MGMT))
        .await
        .expect("run");
    assert_eq!(run.record.state, RunState::RolledBack);
    assert_eq!(run.hygiene_report().expect("report").blocking_count(), 0);
}
