//! Synapse-Core: the netsynapse change-delivery pipeline
//!
//! Automates configuration change delivery to network switches: read
//! intended state from the source-of-truth graph, render the vendor-native
//! payload, gate it on hygiene rules, push it to the device, verify
//! convergence, and record the outcome, rolling back automatically on
//! failure.
//!
//! ## Key Components
//!
//! - [`ChangeOrchestrator`]: the state machine sequencing
//!   backup -> fetch -> render -> hygiene-gate -> deploy -> validate ->
//!   status-update with rollback branches
//! - [`HygieneRuleSet`]: the pre-deployment hygiene gate
//! - [`DeviceGateway`], [`SotClient`], [`ConfigRenderer`]: capability
//!   interfaces for the external collaborators, with in-memory fakes in
//!   [`fakes`]
//! - [`PipelinePolicy`]: retry and convergence-poll configuration

pub mod domain;
pub mod fakes;
pub mod gateway;
pub mod hygiene;
pub mod lease;
pub mod net;
pub mod obs;
pub mod pipeline;
pub mod policy;
pub mod render;
pub mod sot;
pub mod telemetry;
pub mod validate;

pub use domain::{
    BgpSessionIntent, ChangeRequest, DeviceIntent, InterfaceIntent, PipelineError, PipelineRun,
    RenderedConfig, Result, Retryable, VersionedIntent,
};
pub use gateway::{DeviceGateway, GatewayError};
pub use hygiene::{HygieneReport, HygieneRule, HygieneRuleSet, HygieneViolation, Severity};
pub use lease::DeviceLeaseMap;
pub use pipeline::{CancelDecision, ChangeOrchestrator};
pub use policy::{backoff_delay, PipelinePolicy, PollPolicy, RetryPolicy};
pub use render::{ConfigRenderer, RenderError, SrlConfigRenderer};
pub use sot::{DeviceStatus, HttpSotClient, SotClient, SotError, StatusUpdate};
pub use telemetry::init_tracing;
pub use validate::{bgp_sessions_established, BGP_NEIGHBOR_STATE_QUERY};

pub use synapse_state::{
    BackupStore, ContentDigest, DeviceSnapshot, ErrorClass, FailReason, FailureDetail, RunId,
    RunJournal, RunMetadata, RunRecord, RunState, SnapshotSource, StepFailure, StepName,
    StepRecord, StepStatus, TerminalResult,
};

/// netsynapse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
