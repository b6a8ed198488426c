//! Error types for synapse-state

use thiserror::Error;

/// Errors that can occur inside the SurrealDB persistence backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the storage traits
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no snapshot for device {device} with source {snapshot_source}")]
    SnapshotNotFound { device: String, snapshot_source: String },

    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("run {run_id} is in state {state}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        state: String,
        expected: String,
    },

    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
