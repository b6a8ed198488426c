//! Structured observability hooks for pipeline run lifecycle events.
//!
//! Emission functions for key lifecycle events: submit, step outcomes,
//! gate evaluation, rollback, finish. The orchestrator wraps each run in a
//! `synapse.run` tracing span, so every event here carries the run id and
//! device via span context as well as explicit fields.
//!
//! Events are emitted at `info!` level and filtered via `RUST_LOG`.

use synapse_state::{ErrorClass, StepName, TerminalResult};
use tracing::{info, warn};

/// Emit event: change request accepted as a new run.
pub fn emit_run_submitted(run_id: &str, device: &str, correlation_id: &str) {
    info!(
        event = "run.submitted",
        run_id = %run_id,
        device = %device,
        correlation_id = %correlation_id,
    );
}

/// Emit event: a step completed.
pub fn emit_step_completed(run_id: &str, step: StepName, attempts: u32) {
    info!(event = "step.completed", run_id = %run_id, step = %step, attempts = attempts);
}

/// Emit event: a step failed (after any retries).
pub fn emit_step_failed(run_id: &str, step: StepName, class: ErrorClass, message: &str) {
    warn!(
        event = "step.failed",
        run_id = %run_id,
        step = %step,
        class = %class,
        error = %message,
    );
}

/// Emit event: hygiene gate evaluated.
pub fn emit_gate_evaluated(run_id: &str, blocking: usize, advisory: usize, passed: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        blocking = blocking,
        advisory = advisory,
        passed = passed,
    );
}

/// Emit event: rollback started.
pub fn emit_rollback_started(run_id: &str, device: &str) {
    warn!(event = "rollback.started", run_id = %run_id, device = %device);
}

/// Emit event: rollback write failed; the run requires manual intervention.
pub fn emit_rollback_incomplete(run_id: &str, device: &str, error: &dyn std::fmt::Display) {
    tracing::error!(
        event = "rollback.incomplete",
        run_id = %run_id,
        device = %device,
        error = %error,
    );
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(run_id: &str, result: TerminalResult) {
    info!(event = "run.finished", run_id = %run_id, result = ?result);
}

/// Emit event: best-effort status update failed (never fatal).
pub fn emit_status_update_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "status_update.error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_do_not_panic_without_a_subscriber() {
        emit_run_submitted("run-1", "spine01", "corr-1");
        emit_step_completed("run-1", StepName::Backup, 1);
        emit_gate_evaluated("run-1", 0, 2, true);
        emit_run_finished("run-1", TerminalResult::Succeeded);
    }
}
