//! Change request aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to converge one device's configuration with source-of-truth
/// state. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Device identity (opaque hostname key).
    pub device: String,

    /// Device management address the gateway should talk to.
    pub management_addr: String,

    /// Correlation identifier for idempotency and observability.
    pub correlation_id: Uuid,

    /// When the request was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl ChangeRequest {
    /// Create a request with a fresh correlation id.
    pub fn new(device: impl Into<String>, management_addr: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            management_addr: management_addr.into(),
            correlation_id: Uuid::new_v4(),
            submitted_at: Utc::now(),
        }
    }

    /// Override the correlation id (caller-supplied idempotency key).
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
