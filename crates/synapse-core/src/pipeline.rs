//! Change orchestrator: the state machine that sequences
//! backup -> fetch -> render -> hygiene-gate -> deploy -> validate ->
//! status-update, with rollback branches.
//!
//! The orchestrator drives every collaborator; none call back into it. Each
//! step outcome is written to the journal *before* the state advance that
//! follows it, and [`ChangeOrchestrator::drive`] re-reads the persisted
//! state on every iteration, so an interrupted run is resumed by calling
//! `drive` again; step handlers tolerate re-entry (backup overwrites,
//! rendering is deterministic, deploy re-pushes the same payload).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::json;
use tracing::{warn, Instrument};

use synapse_state::{
    BackupStore, DeviceSnapshot, ErrorClass, FailReason, FailureDetail, RunId, RunJournal,
    RunMetadata, RunRecord, RunState, SnapshotSource, StepFailure, StepName, StepRecord,
    StepStatus, StorageError, TerminalResult,
};

use crate::domain::{
    ChangeRequest, PipelineError, PipelineRun, RenderedConfig, Result, Retryable, VersionedIntent,
};
use crate::gateway::DeviceGateway;
use crate::hygiene::HygieneRuleSet;
use crate::lease::DeviceLeaseMap;
use crate::obs;
use crate::policy::{backoff_delay, PipelinePolicy, RetryPolicy};
use crate::render::{ConfigRenderer, RenderError};
use crate::sot::{SotClient, SotError, StatusUpdate};
use crate::validate::{bgp_sessions_established, BGP_NEIGHBOR_STATE_QUERY};

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelDecision {
    Accepted,
    Rejected { reason: String },
}

/// In-memory inputs carried between steps within one `drive` call. On
/// resume the handlers re-derive what is missing from the read-only
/// collaborators.
#[derive(Default)]
struct RunContext {
    intent: Option<VersionedIntent>,
    rendered: Option<RenderedConfig>,
}

/// Why a step handler could not obtain its input on re-entry.
enum InputBlocker {
    Intent(SotError),
    Render(RenderError),
}

/// The change-delivery orchestrator.
///
/// One instance serves many devices; runs for different devices execute
/// concurrently, runs for the same device are serialized by the lease map.
pub struct ChangeOrchestrator {
    journal: Arc<dyn RunJournal>,
    backups: Arc<dyn BackupStore>,
    gateway: Arc<dyn DeviceGateway>,
    sot: Arc<dyn SotClient>,
    renderer: Arc<dyn ConfigRenderer>,
    hygiene: HygieneRuleSet,
    policy: PipelinePolicy,
    leases: DeviceLeaseMap,
    cancels: DashMap<String, Arc<AtomicBool>>,
}

impl ChangeOrchestrator {
    pub fn new(
        journal: Arc<dyn RunJournal>,
        backups: Arc<dyn BackupStore>,
        gateway: Arc<dyn DeviceGateway>,
        sot: Arc<dyn SotClient>,
        renderer: Arc<dyn ConfigRenderer>,
    ) -> Self {
        Self {
            journal,
            backups,
            gateway,
            sot,
            renderer,
            hygiene: HygieneRuleSet::standard(),
            policy: PipelinePolicy::default(),
            leases: DeviceLeaseMap::new(),
            cancels: DashMap::new(),
        }
    }

    /// Override the retry/poll policy.
    pub fn with_policy(mut self, policy: PipelinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the hygiene rule set.
    pub fn with_hygiene(mut self, hygiene: HygieneRuleSet) -> Self {
        self.hygiene = hygiene;
        self
    }

    // -- caller-facing surface ----------------------------------------------

    /// Accept a change request, creating a run in the `Accepted` state.
    ///
    /// Enforces at-most-one in-flight run per device: a request for a busy
    /// device is rejected immediately with [`PipelineError::Busy`], never
    /// queued. Queueing is the caller's policy decision.
    ///
    /// The accepted run holds the device lease until
    /// [`ChangeOrchestrator::drive`] takes it to a terminal state.
    pub async fn submit(&self, request: ChangeRequest) -> Result<RunId> {
        if !self.leases.reserve(&request.device) {
            return Err(PipelineError::Busy {
                device: request.device,
            });
        }

        // The lease map only covers this process; the journal check covers
        // runs left non-terminal by a previous process (resume case).
        match self.journal.active_run_for(&request.device).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                self.leases.release(&request.device);
                return Err(PipelineError::Busy {
                    device: request.device,
                });
            }
            Err(e) => {
                self.leases.release(&request.device);
                return Err(e.into());
            }
        }

        let metadata = RunMetadata {
            device: request.device.clone(),
            management_addr: request.management_addr.clone(),
            correlation_id: request.correlation_id.to_string(),
            tags: json!({"submitted_at": request.submitted_at.to_rfc3339()}),
        };

        let run_id = match self.journal.create_run(metadata).await {
            Ok(id) => id,
            Err(e) => {
                self.leases.release(&request.device);
                return Err(e.into());
            }
        };

        self.leases.bind(&request.device, &run_id);
        self.cancels
            .insert(run_id.0.clone(), Arc::new(AtomicBool::new(false)));
        obs::emit_run_submitted(
            &run_id.0,
            &request.device,
            &request.correlation_id.to_string(),
        );
        Ok(run_id)
    }

    /// Drive a run to a terminal state and return its final record.
    ///
    /// Safe to call again on a run that was interrupted mid-flight: the
    /// loop re-enters the state machine at the last persisted state. One
    /// driver per run at a time.
    pub async fn drive(&self, run_id: &RunId) -> Result<PipelineRun> {
        let record = self.fetch_record(run_id).await?;
        let span = tracing::info_span!(
            "synapse.run",
            run_id = %run_id,
            device = %record.metadata.device,
        );
        self.drive_inner(run_id).instrument(span).await
    }

    /// Submit and drive in one awaitable.
    pub async fn execute(&self, request: ChangeRequest) -> Result<PipelineRun> {
        let run_id = self.submit(request).await?;
        self.drive(&run_id).await
    }

    /// Current run record plus its step-outcome log.
    pub async fn run_status(&self, run_id: &RunId) -> Result<PipelineRun> {
        let record = self.fetch_record(run_id).await?;
        let steps = self.journal.get_steps(run_id).await?;
        Ok(PipelineRun::new(record, steps))
    }

    /// Request cancellation of a run.
    ///
    /// Accepted only while nothing has been written to the device
    /// (`Accepted` through `Hygiene-Gating`); from `Deploying` on, the run
    /// must reach a terminal state through the defined branches.
    pub async fn request_cancel(&self, run_id: &RunId) -> Result<CancelDecision> {
        let run = self.fetch_record(run_id).await?;
        if run.state.is_terminal() {
            return Ok(CancelDecision::Rejected {
                reason: format!("run is already terminal ({})", run.state),
            });
        }
        if !run.state.is_cancellable() {
            return Ok(CancelDecision::Rejected {
                reason: format!(
                    "run is in {}; deployment must reach a terminal state",
                    run.state
                ),
            });
        }
        let flag = self
            .cancels
            .entry(run_id.0.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();
        flag.store(true, Ordering::SeqCst);
        Ok(CancelDecision::Accepted)
    }

    // -- state machine loop -------------------------------------------------

    async fn drive_inner(&self, run_id: &RunId) -> Result<PipelineRun> {
        let mut ctx = RunContext::default();
        loop {
            let run = self.fetch_record(run_id).await?;
            match run.state {
                RunState::Succeeded | RunState::Failed | RunState::RolledBack => {
                    self.leases.release(&run.metadata.device);
                    self.cancels.remove(&run_id.0);
                    let steps = self.journal.get_steps(run_id).await?;
                    return Ok(PipelineRun::new(run, steps));
                }
                RunState::Accepted => {
                    self.journal
                        .advance_state(run_id, RunState::BackingUp)
                        .await?;
                }
                RunState::BackingUp => self.step_backup(run_id, &run).await?,
                RunState::Fetching => self.step_fetch(run_id, &run, &mut ctx).await?,
                RunState::Rendering => self.step_render(run_id, &run, &mut ctx).await?,
                RunState::HygieneGating => self.step_hygiene_gate(run_id, &run, &mut ctx).await?,
                RunState::Deploying => self.step_deploy(run_id, &run, &mut ctx).await?,
                RunState::Validating => self.step_validate(run_id, &run).await?,
                RunState::UpdatingStatus => self.step_update_status(run_id, &run).await?,
                RunState::RollingBack => self.step_rollback(run_id, &run).await?,
            }
        }
    }

    // -- step handlers ------------------------------------------------------

    /// Backing-Up: capture the pre-change snapshot. The pipeline never
    /// proceeds without a known-good snapshot to roll back to.
    async fn step_backup(&self, run_id: &RunId, run: &RunRecord) -> Result<()> {
        if self.cancel_requested(run_id) {
            return self.finish_cancelled(run_id, run, StepName::Backup).await;
        }

        let device = &run.metadata.device;
        let addr = &run.metadata.management_addr;
        let (result, attempts) =
            with_retry(&self.policy.retry, || self.gateway.read_config(device, addr)).await;

        match result {
            Ok(payload) => {
                let snapshot =
                    DeviceSnapshot::capture(device, payload, SnapshotSource::PreChange);
                let digest = snapshot.digest.clone();
                self.backups.save(snapshot).await?;
                self.record_completed(
                    run_id,
                    StepName::Backup,
                    attempts,
                    json!({"attempts": attempts, "digest": digest.as_str()}),
                )
                .await?;
                self.journal.advance_state(run_id, RunState::Fetching).await?;
                Ok(())
            }
            Err(e) => {
                self.finish_failed(
                    run_id,
                    run,
                    StepName::Backup,
                    StepFailure {
                        class: e.class(),
                        message: e.to_string(),
                        attempts,
                    },
                    FailReason::BackupUnreachable,
                )
                .await
            }
        }
    }

    /// Fetching: pull intended state and its version tag.
    async fn step_fetch(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> Result<()> {
        if self.cancel_requested(run_id) {
            return self.finish_cancelled(run_id, run, StepName::Fetch).await;
        }

        let device = &run.metadata.device;
        let (result, attempts) =
            with_retry(&self.policy.retry, || self.sot.fetch_intent(device)).await;

        match result {
            Ok(versioned) => {
                let version = versioned.version.clone();
                ctx.intent = Some(versioned);
                self.record_completed(
                    run_id,
                    StepName::Fetch,
                    attempts,
                    json!({"attempts": attempts, "version": version}),
                )
                .await?;
                self.journal
                    .advance_state(run_id, RunState::Rendering)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.finish_failed(
                    run_id,
                    run,
                    StepName::Fetch,
                    StepFailure {
                        class: e.class(),
                        message: e.to_string(),
                        attempts,
                    },
                    FailReason::IntentUnavailable,
                )
                .await
            }
        }
    }

    /// Rendering: turn intent into the device-native payload.
    async fn step_render(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> Result<()> {
        if self.cancel_requested(run_id) {
            return self.finish_cancelled(run_id, run, StepName::Render).await;
        }

        let versioned = match self.ensure_intent(run, ctx).await {
            Ok(v) => v,
            Err(e) => {
                return self
                    .finish_failed(
                        run_id,
                        run,
                        StepName::Render,
                        StepFailure {
                            class: e.class(),
                            message: e.to_string(),
                            attempts: self.policy.retry.max_attempts,
                        },
                        FailReason::IntentUnavailable,
                    )
                    .await;
            }
        };

        match self.renderer.render(&versioned.intent, &versioned.version) {
            Ok(rendered) => {
                let digest = rendered.digest();
                let version = rendered.version.clone();
                ctx.rendered = Some(rendered);
                self.record_completed(
                    run_id,
                    StepName::Render,
                    1,
                    json!({"digest": digest.as_str(), "version": version}),
                )
                .await?;
                self.journal
                    .advance_state(run_id, RunState::HygieneGating)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.finish_failed(
                    run_id,
                    run,
                    StepName::Render,
                    StepFailure {
                        class: ErrorClass::RejectedPayload,
                        message: e.to_string(),
                        attempts: 1,
                    },
                    FailReason::RenderError,
                )
                .await
            }
        }
    }

    /// Hygiene-Gating: the hard gate. A payload with blocking violations is
    /// never deployed, regardless of retry.
    async fn step_hygiene_gate(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> Result<()> {
        if self.cancel_requested(run_id) {
            return self
                .finish_cancelled(run_id, run, StepName::HygieneGate)
                .await;
        }

        let rendered = match self.ensure_rendered(run, ctx).await {
            Ok(r) => r,
            Err(blocker) => return self.fail_on_blocker(run_id, run, blocker).await,
        };

        let report = self.hygiene.evaluate(&rendered);
        let blocking = report.blocking_count();
        let advisory = report.violations.len() - blocking;
        obs::emit_gate_evaluated(&run_id.0, blocking, advisory, report.pass);
        let report_json = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);

        if report.pass {
            let seq = self.next_seq(run_id).await?;
            self.journal
                .record_step(
                    run_id,
                    StepRecord::completed_with(seq, StepName::HygieneGate, report_json),
                )
                .await?;
            obs::emit_step_completed(&run_id.0, StepName::HygieneGate, 1);
            self.journal
                .advance_state(run_id, RunState::Deploying)
                .await?;
            Ok(())
        } else {
            // The full violation list travels in the step detail for
            // operator visibility.
            let failure = StepFailure {
                class: ErrorClass::HygieneViolation,
                message: format!("{} blocking hygiene violation(s)", blocking),
                attempts: 1,
            };
            let seq = self.next_seq(run_id).await?;
            self.journal
                .record_step(
                    run_id,
                    StepRecord::failed(seq, StepName::HygieneGate, failure.clone())
                        .with_detail(report_json),
                )
                .await?;
            obs::emit_step_failed(
                &run_id.0,
                StepName::HygieneGate,
                failure.class,
                &failure.message,
            );
            self.finalize_failed(
                run_id,
                run,
                FailureDetail {
                    step: StepName::HygieneGate,
                    class: Some(ErrorClass::HygieneViolation),
                    reason: FailReason::HygieneRejected,
                    message: failure.message,
                    rollback_attempted: false,
                    rollback_complete: false,
                },
            )
            .await
        }
    }

    /// Deploying: push the payload. Failure branches to rollback, not to a
    /// plain failure, since something may already be written.
    async fn step_deploy(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let rendered = match self.ensure_rendered(run, ctx).await {
            Ok(r) => r,
            Err(blocker) => return self.fail_on_blocker(run_id, run, blocker).await,
        };

        let device = &run.metadata.device;
        let addr = &run.metadata.management_addr;
        let payload = &rendered.payload;
        let (result, attempts) = with_retry(&self.policy.retry, || {
            self.gateway.write_config(device, addr, payload)
        })
        .await;

        match result {
            Ok(()) => {
                self.record_completed(
                    run_id,
                    StepName::Deploy,
                    attempts,
                    json!({"attempts": attempts, "digest": rendered.digest().as_str()}),
                )
                .await?;
                self.journal
                    .advance_state(run_id, RunState::Validating)
                    .await?;
                Ok(())
            }
            Err(e) => {
                let failure = StepFailure {
                    class: e.class(),
                    message: e.to_string(),
                    attempts,
                };
                self.record_failed(run_id, StepName::Deploy, failure).await?;
                self.journal
                    .advance_state(run_id, RunState::RollingBack)
                    .await?;
                Ok(())
            }
        }
    }

    /// Validating: poll operational state until the targeted condition is
    /// met or the budget runs out. This is waiting for convergence, not
    /// retrying a fault: a transient read error counts as an unmet
    /// condition and the poll continues.
    async fn step_validate(&self, run_id: &RunId, run: &RunRecord) -> Result<()> {
        let device = &run.metadata.device;
        let addr = &run.metadata.management_addr;
        let poll = &self.policy.convergence;
        let deadline = Instant::now() + poll.budget;

        let mut attempts = 0u32;
        let converged = loop {
            attempts += 1;
            match self
                .gateway
                .read_oper_state(device, addr, BGP_NEIGHBOR_STATE_QUERY)
                .await
            {
                Ok(state) if bgp_sessions_established(device, &state) => break true,
                Ok(_) => {}
                Err(e) => {
                    warn!(device = %device, error = %e, "operational-state read failed; polling on");
                }
            }
            if attempts >= poll.max_attempts || Instant::now() >= deadline {
                break false;
            }
            let delay = backoff_delay(poll.interval_base, poll.interval_cap, attempts + 1);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        };

        if converged {
            // Post-change read-back, best-effort: the audit snapshot should
            // not fail an already-converged run.
            let (readback, _) =
                with_retry(&self.policy.retry, || self.gateway.read_config(device, addr)).await;
            match readback {
                Ok(payload) => {
                    self.backups
                        .save(DeviceSnapshot::capture(
                            device,
                            payload,
                            SnapshotSource::PostChange,
                        ))
                        .await?;
                }
                Err(e) => {
                    warn!(device = %device, error = %e, "post-change read-back failed");
                }
            }
            self.record_completed(
                run_id,
                StepName::Validate,
                attempts,
                json!({"attempts": attempts}),
            )
            .await?;
            self.journal
                .advance_state(run_id, RunState::UpdatingStatus)
                .await?;
            Ok(())
        } else {
            let failure = StepFailure {
                class: ErrorClass::ConvergenceTimeout,
                message: format!(
                    "BGP sessions did not reach established within budget ({} observations)",
                    attempts
                ),
                attempts,
            };
            self.record_failed(run_id, StepName::Validate, failure).await?;
            self.journal
                .advance_state(run_id, RunState::RollingBack)
                .await?;
            Ok(())
        }
    }

    /// Updating-Status: best-effort. A failure here is recorded and logged
    /// but the run still resolves `Succeeded`.
    async fn step_update_status(&self, run_id: &RunId, run: &RunRecord) -> Result<()> {
        let device = &run.metadata.device;
        let update = StatusUpdate::new(TerminalResult::Succeeded, None);
        let (result, attempts) = with_retry(&self.policy.retry, || {
            self.sot.update_status(device, update.clone())
        })
        .await;

        match result {
            Ok(()) => {
                self.record_completed(
                    run_id,
                    StepName::UpdateStatus,
                    attempts,
                    json!({"attempts": attempts}),
                )
                .await?;
            }
            Err(e) => {
                obs::emit_status_update_error(&run_id.0, &e);
                self.record_failed(
                    run_id,
                    StepName::UpdateStatus,
                    StepFailure {
                        class: e.class(),
                        message: e.to_string(),
                        attempts,
                    },
                )
                .await?;
            }
        }

        self.journal
            .finalize_run(run_id, RunState::Succeeded, TerminalResult::Succeeded, None)
            .await?;
        obs::emit_run_finished(&run_id.0, TerminalResult::Succeeded);
        Ok(())
    }

    /// Rolling-Back: push the saved pre-change snapshot back. If the
    /// rollback write itself fails the run still ends `Rolled-Back` but
    /// flagged incomplete, the one state requiring human intervention.
    async fn step_rollback(&self, run_id: &RunId, run: &RunRecord) -> Result<()> {
        let device = &run.metadata.device;
        let addr = &run.metadata.management_addr;
        obs::emit_rollback_started(&run_id.0, device);

        let cause = self.rollback_cause(run_id).await?;

        let snapshot = match self.backups.latest(device, SnapshotSource::PreChange).await {
            Ok(s) => s,
            Err(e) => {
                // Unreachable under the backup-precedes-deploy discipline,
                // but a missing snapshot must still surface as incomplete.
                obs::emit_rollback_incomplete(&run_id.0, device, &e);
                self.record_failed(
                    run_id,
                    StepName::Rollback,
                    StepFailure {
                        class: ErrorClass::RollbackFailure,
                        message: format!("no pre-change snapshot: {}", e),
                        attempts: 1,
                    },
                )
                .await?;
                return self
                    .finalize_rolled_back(run_id, run, cause, false)
                    .await;
            }
        };

        let payload = &snapshot.payload;
        let (result, attempts) = with_retry(&self.policy.retry, || {
            self.gateway.write_config(device, addr, payload)
        })
        .await;

        match result {
            Ok(()) => {
                self.record_completed(
                    run_id,
                    StepName::Rollback,
                    attempts,
                    json!({"attempts": attempts, "digest": snapshot.digest.as_str()}),
                )
                .await?;
                self.finalize_rolled_back(run_id, run, cause, true).await
            }
            Err(e) => {
                obs::emit_rollback_incomplete(&run_id.0, device, &e);
                self.record_failed(
                    run_id,
                    StepName::Rollback,
                    StepFailure {
                        class: ErrorClass::RollbackFailure,
                        message: e.to_string(),
                        attempts,
                    },
                )
                .await?;
                self.finalize_rolled_back(run_id, run, cause, false).await
            }
        }
    }

    // -- shared plumbing ----------------------------------------------------

    async fn fetch_record(&self, run_id: &RunId) -> Result<RunRecord> {
        self.journal.get_run(run_id).await.map_err(|e| match e {
            StorageError::RunNotFound { .. } => PipelineError::RunNotFound(run_id.clone()),
            other => other.into(),
        })
    }

    fn cancel_requested(&self, run_id: &RunId) -> bool {
        self.cancels
            .get(&run_id.0)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn next_seq(&self, run_id: &RunId) -> Result<u64> {
        Ok(self.journal.get_steps(run_id).await?.len() as u64 + 1)
    }

    async fn record_completed(
        &self,
        run_id: &RunId,
        step: StepName,
        attempts: u32,
        detail: serde_json::Value,
    ) -> Result<()> {
        let seq = self.next_seq(run_id).await?;
        self.journal
            .record_step(run_id, StepRecord::completed_with(seq, step, detail))
            .await?;
        obs::emit_step_completed(&run_id.0, step, attempts);
        Ok(())
    }

    async fn record_failed(
        &self,
        run_id: &RunId,
        step: StepName,
        failure: StepFailure,
    ) -> Result<()> {
        let seq = self.next_seq(run_id).await?;
        obs::emit_step_failed(&run_id.0, step, failure.class, &failure.message);
        self.journal
            .record_step(run_id, StepRecord::failed(seq, step, failure))
            .await?;
        Ok(())
    }

    /// Record a failed step and finalize the run as `Failed` (pre-deploy
    /// branch: nothing was written to the device, so no rollback is needed).
    async fn finish_failed(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        step: StepName,
        failure: StepFailure,
        reason: FailReason,
    ) -> Result<()> {
        let class = failure.class;
        let message = failure.message.clone();
        self.record_failed(run_id, step, failure).await?;
        self.finalize_failed(
            run_id,
            run,
            FailureDetail {
                step,
                class: Some(class),
                reason,
                message,
                rollback_attempted: false,
                rollback_complete: false,
            },
        )
        .await
    }

    async fn finalize_failed(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        detail: FailureDetail,
    ) -> Result<()> {
        let message = detail.message.clone();
        self.journal
            .finalize_run(run_id, RunState::Failed, TerminalResult::Failed, Some(detail))
            .await?;
        obs::emit_run_finished(&run_id.0, TerminalResult::Failed);
        self.notify_outcome(run, TerminalResult::Failed, Some(message))
            .await;
        Ok(())
    }

    async fn finish_cancelled(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        step: StepName,
    ) -> Result<()> {
        let seq = self.next_seq(run_id).await?;
        self.journal
            .record_step(run_id, StepRecord::cancelled(seq, step))
            .await?;
        self.journal
            .finalize_run(
                run_id,
                RunState::Failed,
                TerminalResult::Failed,
                Some(FailureDetail {
                    step,
                    class: None,
                    reason: FailReason::Cancelled,
                    message: "cancelled by caller before deployment".to_string(),
                    rollback_attempted: false,
                    rollback_complete: false,
                }),
            )
            .await?;
        obs::emit_run_finished(&run_id.0, TerminalResult::Failed);
        self.notify_outcome(run, TerminalResult::Failed, Some("cancelled".to_string()))
            .await;
        Ok(())
    }

    async fn finalize_rolled_back(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        cause: FailureDetail,
        complete: bool,
    ) -> Result<()> {
        let detail = FailureDetail {
            class: if complete {
                cause.class
            } else {
                Some(ErrorClass::RollbackFailure)
            },
            rollback_attempted: true,
            rollback_complete: complete,
            ..cause
        };
        let message = detail.message.clone();
        self.journal
            .finalize_run(
                run_id,
                RunState::RolledBack,
                TerminalResult::RolledBack,
                Some(detail),
            )
            .await?;
        obs::emit_run_finished(&run_id.0, TerminalResult::RolledBack);
        self.notify_outcome(run, TerminalResult::RolledBack, Some(message))
            .await;
        Ok(())
    }

    /// Reconstruct why the run entered `Rolling-Back` from the step log:
    /// the failed deploy/validate outcome was recorded before the state
    /// advance, so this survives a crash-resume.
    async fn rollback_cause(&self, run_id: &RunId) -> Result<FailureDetail> {
        let steps = self.journal.get_steps(run_id).await?;
        let failed = steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Failed);

        Ok(match failed {
            Some(step) => {
                let reason = match step.step {
                    StepName::Validate => FailReason::ConvergenceTimeout,
                    _ => FailReason::DeployFailed,
                };
                FailureDetail {
                    step: step.step,
                    class: step.error.as_ref().map(|e| e.class),
                    reason,
                    message: step
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "deploy failed".to_string()),
                    rollback_attempted: true,
                    rollback_complete: false,
                }
            }
            None => FailureDetail {
                step: StepName::Deploy,
                class: None,
                reason: FailReason::DeployFailed,
                message: "rollback entered without a recorded cause".to_string(),
                rollback_attempted: true,
                rollback_complete: false,
            },
        })
    }

    /// Best-effort outcome notification on failure branches. Never changes
    /// the terminal result.
    async fn notify_outcome(&self, run: &RunRecord, outcome: TerminalResult, detail: Option<String>) {
        if let Err(e) = self
            .sot
            .update_status(&run.metadata.device, StatusUpdate::new(outcome, detail))
            .await
        {
            obs::emit_status_update_error(&run.run_id.0, &e);
        }
    }

    /// Intent for this run, fetched if not already in hand (resume path).
    async fn ensure_intent(
        &self,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> std::result::Result<VersionedIntent, SotError> {
        if let Some(versioned) = &ctx.intent {
            return Ok(versioned.clone());
        }
        let (result, _) =
            with_retry(&self.policy.retry, || {
                self.sot.fetch_intent(&run.metadata.device)
            })
            .await;
        let versioned = result?;
        ctx.intent = Some(versioned.clone());
        Ok(versioned)
    }

    /// Rendered payload for this run, re-derived if not in hand. Rendering
    /// is deterministic, so re-derivation yields the payload the gate
    /// approved.
    async fn ensure_rendered(
        &self,
        run: &RunRecord,
        ctx: &mut RunContext,
    ) -> std::result::Result<RenderedConfig, InputBlocker> {
        if let Some(rendered) = &ctx.rendered {
            return Ok(rendered.clone());
        }
        let versioned = self
            .ensure_intent(run, ctx)
            .await
            .map_err(InputBlocker::Intent)?;
        let rendered = self
            .renderer
            .render(&versioned.intent, &versioned.version)
            .map_err(InputBlocker::Render)?;
        ctx.rendered = Some(rendered.clone());
        Ok(rendered)
    }

    /// A step handler's input could not be re-derived; surface it at the
    /// step that needed it.
    async fn fail_on_blocker(
        &self,
        run_id: &RunId,
        run: &RunRecord,
        blocker: InputBlocker,
    ) -> Result<()> {
        let run_state = run.state;
        let step = match run_state {
            RunState::Deploying => StepName::Deploy,
            _ => StepName::HygieneGate,
        };
        let (class, reason, message) = match blocker {
            InputBlocker::Intent(e) => (e.class(), FailReason::IntentUnavailable, e.to_string()),
            InputBlocker::Render(e) => {
                (ErrorClass::RejectedPayload, FailReason::RenderError, e.to_string())
            }
        };
        self.finish_failed(
            run_id,
            run,
            step,
            StepFailure {
                class,
                message,
                attempts: 1,
            },
            reason,
        )
        .await
    }
}

/// Bounded retry with exponential backoff, for transient infrastructure
/// failures only. Deterministic rejections return immediately. Returns the
/// final result and the number of attempts spent.
async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> (std::result::Result<T, E>, u32)
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                attempt += 1;
                let delay = backoff_delay(policy.backoff_base, policy.backoff_cap, attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
