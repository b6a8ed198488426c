//! Synapse-State: persistence layer for the netsynapse change pipeline
//!
//! This crate provides the storage abstractions the change-delivery pipeline
//! depends on, plus their implementations.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durable, auditable pipeline run records and last-known-good
//! device snapshots.
//!
//! ## Key Components
//!
//! - `BackupStore`: most recent known-good configuration per device
//! - `RunJournal`: pipeline run state + ordered step-outcome log
//! - `fakes`: in-memory implementations for testing and embedded use
//! - `SurrealRunJournal`: durable SurrealDB-backed journal

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_journal;

pub use error::{StateError, StorageError};
pub use schema::{RunRow, StepRow};
pub use storage_traits::{
    BackupStore, ContentDigest, DeviceSnapshot, ErrorClass, FailReason, FailureDetail, RunId,
    RunJournal, RunMetadata, RunRecord, RunState, SnapshotSource, StepFailure, StepName,
    StepRecord, StepStatus, StorageResult, TerminalResult,
};
pub use surreal_journal::SurrealRunJournal;

/// Result type for synapse-state operations
pub type Result<T> = std::result::Result<T, StateError>;
