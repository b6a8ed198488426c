//! Storage trait definitions for netsynapse
//!
//! These traits define the persistence abstractions the change pipeline
//! depends on:
//! - `BackupStore`: last-known-good device configuration snapshots
//! - `RunJournal`: pipeline run persistence (state, step-outcome log)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module; a SurrealDB-backed `RunJournal` lives
//! in `surreal_journal`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string) of a configuration payload.
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of a JSON payload in canonical (sorted-key) form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        Self::from_bytes(&bytes)
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BackupStore - last-known-good device snapshots
// ---------------------------------------------------------------------------

/// Which side of a change a snapshot was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotSource {
    PreChange,
    PostChange,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotSource::PreChange => write!(f, "pre-change"),
            SnapshotSource::PostChange => write!(f, "post-change"),
        }
    }
}

/// A captured configuration state for one device at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device identity (opaque hostname key).
    pub device: String,
    /// Vendor-native configuration document.
    pub payload: serde_json::Value,
    /// SHA-256 digest of the payload, for audit correlation.
    pub digest: ContentDigest,
    /// When the snapshot was captured.
    pub captured_at: DateTime<Utc>,
    /// Capture side: before or after the change.
    pub source: SnapshotSource,
}

impl DeviceSnapshot {
    /// Capture a snapshot now, computing the payload digest.
    pub fn capture(
        device: impl Into<String>,
        payload: serde_json::Value,
        source: SnapshotSource,
    ) -> Self {
        let digest = ContentDigest::from_json(&payload);
        Self {
            device: device.into(),
            payload,
            digest,
            captured_at: Utc::now(),
            source,
        }
    }
}

/// Store of the most recent known-good configuration per device.
///
/// Guarantees:
/// - Last-write-wins per `(device, source)` pair; no history is retained.
/// - Reads and writes for different devices never contend on a shared lock.
/// - `latest` returns `StorageError::SnapshotNotFound` when no capture exists.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Save a snapshot, superseding any previous one for the same
    /// `(device, source)` pair.
    async fn save(&self, snapshot: DeviceSnapshot) -> StorageResult<()>;

    /// Fetch the most recent snapshot for a device and source tag.
    async fn latest(&self, device: &str, source: SnapshotSource)
        -> StorageResult<DeviceSnapshot>;
}

// ---------------------------------------------------------------------------
// RunJournal - pipeline run persistence
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States of the change-delivery state machine.
///
/// `Succeeded`, `Failed`, and `RolledBack` are terminal; a run reaches them
/// only through [`RunJournal::finalize_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Accepted,
    BackingUp,
    Fetching,
    Rendering,
    HygieneGating,
    Deploying,
    Validating,
    UpdatingStatus,
    RollingBack,
    Succeeded,
    Failed,
    RolledBack,
}

impl RunState {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::RolledBack
        )
    }

    /// Whether cancellation may still be accepted: true only while nothing
    /// has been written to the device.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            RunState::Accepted
                | RunState::BackingUp
                | RunState::Fetching
                | RunState::Rendering
                | RunState::HygieneGating
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", s)
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalResult {
    Succeeded,
    Failed,
    RolledBack,
}

/// Error taxonomy for step failures.
///
/// Only `TransientInfra` is retried; everything else propagates to a
/// terminal state immediately. `RollbackFailure` is the one severity
/// escalation; it always surfaces as requiring manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    TransientInfra,
    RejectedPayload,
    HygieneViolation,
    ConvergenceTimeout,
    RollbackFailure,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::TransientInfra => "transient-infra",
            ErrorClass::RejectedPayload => "rejected-payload",
            ErrorClass::HygieneViolation => "hygiene-violation",
            ErrorClass::ConvergenceTimeout => "convergence-timeout",
            ErrorClass::RollbackFailure => "rollback-failure",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a run left the happy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailReason {
    /// Could not capture a pre-change snapshot; the pipeline never proceeds
    /// without one.
    BackupUnreachable,
    /// Source-of-truth fetch failed or the device is unknown.
    IntentUnavailable,
    /// The renderer rejected the intended state.
    RenderError,
    /// Blocking hygiene violations; never deployed.
    HygieneRejected,
    /// The device write failed after retries.
    DeployFailed,
    /// The post-deploy condition never converged within budget.
    ConvergenceTimeout,
    /// The caller cancelled the run before anything was written.
    Cancelled,
}

/// Pipeline steps, in execution order. `Rollback` only appears on the
/// failure branch out of `Deploying`/`Validating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    Backup,
    Fetch,
    Render,
    HygieneGate,
    Deploy,
    Validate,
    UpdateStatus,
    Rollback,
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", s)
    }
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The failure half of a step outcome: classification, message, and how many
/// attempts were spent before giving up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
}

/// One entry in a run's ordered step-outcome log.
///
/// The orchestrator assigns `seq` monotonically and records the outcome
/// *before* advancing run state, so an interrupted run can always be resumed
/// from its last recorded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Monotonic sequence number within the run (1-indexed).
    pub seq: u64,
    pub step: StepName,
    pub status: StepStatus,
    /// Present when `status` is `Failed`.
    pub error: Option<StepFailure>,
    /// Step-specific payload (e.g. the hygiene report for the gate step).
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// A completed step with no extra detail.
    pub fn completed(seq: u64, step: StepName) -> Self {
        Self {
            seq,
            step,
            status: StepStatus::Completed,
            error: None,
            detail: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    /// A completed step carrying a detail payload.
    pub fn completed_with(seq: u64, step: StepName, detail: serde_json::Value) -> Self {
        Self {
            detail,
            ..Self::completed(seq, step)
        }
    }

    /// A failed step.
    pub fn failed(seq: u64, step: StepName, failure: StepFailure) -> Self {
        Self {
            seq,
            step,
            status: StepStatus::Failed,
            error: Some(failure),
            detail: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    /// Attach a detail payload.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// A step pre-empted by caller cancellation.
    pub fn cancelled(seq: u64, step: StepName) -> Self {
        Self {
            seq,
            step,
            status: StepStatus::Cancelled,
            error: None,
            detail: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }
}

/// Detail attached to a run that left the happy path: which step failed, how
/// it was classified, and whether a rollback was attempted and completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub step: StepName,
    /// Absent for caller cancellations, which carry no error class.
    pub class: Option<ErrorClass>,
    pub reason: FailReason,
    pub message: String,
    pub rollback_attempted: bool,
    /// False only in the `rollback-incomplete` case, the one state that
    /// requires human intervention.
    pub rollback_complete: bool,
}

/// Metadata attached to a run at creation time, taken from the
/// change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Device identity (opaque hostname key).
    pub device: String,
    /// Device management address.
    pub management_addr: String,
    /// Correlation identifier for idempotency and observability.
    pub correlation_id: String,
    /// Arbitrary key-value tags.
    pub tags: serde_json::Value,
}

/// Full run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub state: RunState,
    /// Set when the run reaches a terminal state.
    pub result: Option<TerminalResult>,
    /// Set when the terminal result is not `Succeeded`.
    pub failure: Option<FailureDetail>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pipeline run journal.
///
/// Guarantees:
/// - Step records are ordered by monotonic `seq` within a run.
/// - A run's state only changes through `advance_state` (non-terminal
///   targets) and `finalize_run` (terminal targets); finalized runs are
///   immutable.
/// - A step outcome written with `record_step` survives a crash between the
///   write and the following `advance_state`, which is what makes
///   re-entering the state machine safe.
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Create a new run in the `Accepted` state, returning its unique ID.
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId>;

    /// Append a step outcome to an active run. Fails if the run is terminal.
    async fn record_step(&self, run_id: &RunId, step: StepRecord) -> StorageResult<()>;

    /// Move an active run to a new non-terminal state.
    async fn advance_state(&self, run_id: &RunId, state: RunState) -> StorageResult<()>;

    /// Move an active run to a terminal state with its result and, for
    /// non-succeeded outcomes, the failure detail.
    async fn finalize_run(
        &self,
        run_id: &RunId,
        state: RunState,
        result: TerminalResult,
        failure: Option<FailureDetail>,
    ) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all step records for a run, ordered by seq.
    async fn get_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>>;

    /// List runs, optionally filtered by device identity.
    async fn list_runs(&self, device: Option<&str>) -> StorageResult<Vec<RunRecord>>;

    /// The non-terminal run for a device, if one exists. Used to enforce the
    /// at-most-one-in-flight rule across process restarts.
    async fn active_run_for(&self, device: &str) -> StorageResult<Option<RunRecord>>;
}
