//! Domain-level error taxonomy for the change pipeline.

use synapse_state::{RunId, StorageError};

/// Whether an error is a transient infrastructure fault worth retrying.
///
/// Only `TransientInfra`-class failures are retried; deterministic
/// rejections surface immediately.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Errors surfaced by the orchestrator's caller-facing API.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A non-terminal run already exists for the device. Never queued
    /// silently; queueing is the caller's policy decision.
    #[error("device busy: a change pipeline is already in flight for {device}")]
    Busy { device: String },

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
