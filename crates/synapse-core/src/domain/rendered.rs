//! Rendered configuration payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synapse_state::ContentDigest;

/// The device-native payload produced from intended state.
///
/// Transient: exists only within one pipeline run; never persisted beyond
/// the run's audit trail. The payload is opaque to the orchestrator beyond
/// being comparable for equality and hygiene-checkable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedConfig {
    /// Device identity.
    pub device: String,
    /// Vendor-native configuration document.
    pub payload: serde_json::Value,
    /// Source intended-state version tag, for staleness detection.
    pub version: String,
    /// When the payload was rendered.
    pub rendered_at: DateTime<Utc>,
}

impl RenderedConfig {
    pub fn new(device: impl Into<String>, payload: serde_json::Value, version: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            payload,
            version: version.into(),
            rendered_at: Utc::now(),
        }
    }

    /// Digest of the payload in canonical form.
    pub fn digest(&self) -> ContentDigest {
        ContentDigest::from_json(&self.payload)
    }

    /// Canonical byte encoding of the payload. Two renders of the same
    /// intent and version must produce identical bytes.
    pub fn payload_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload).unwrap_or_default()
    }
}
