//! Source-of-truth client interface.
//!
//! Two operations: fetch the intended state for a device (with its version
//! tag) and push a status update after a run completes. Status updates are
//! best-effort; a failure is logged by the orchestrator and never changes a
//! terminal pipeline outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use synapse_state::{ContentDigest, ErrorClass, TerminalResult};
use thiserror::Error;
use tracing::debug;

use crate::domain::{DeviceIntent, Retryable, VersionedIntent};

/// Failures from the source-of-truth service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SotError {
    /// The service could not be reached.
    #[error("source of truth unreachable: {0}")]
    Unreachable(String),

    /// The device is not known to the graph.
    #[error("device not found in source of truth: {hostname}")]
    DeviceNotFound { hostname: String },

    /// The service answered, but not with anything usable.
    #[error("source of truth protocol error: {0}")]
    Protocol(String),
}

impl SotError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SotError::Unreachable(_) => ErrorClass::TransientInfra,
            // Deterministic given the same input; surfaces immediately.
            SotError::DeviceNotFound { .. } | SotError::Protocol(_) => ErrorClass::RejectedPayload,
        }
    }
}

impl Retryable for SotError {
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientInfra
    }
}

/// Device lifecycle status vocabulary in the source-of-truth graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Provisioning,
    Maintenance,
    Drained,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Provisioning => "provisioning",
            DeviceStatus::Maintenance => "maintenance",
            DeviceStatus::Drained => "drained",
        }
    }
}

/// Outcome payload for the status-update mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub outcome: TerminalResult,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(outcome: TerminalResult, detail: Option<String>) -> Self {
        Self {
            outcome,
            detail,
            at: Utc::now(),
        }
    }

    /// The device status a terminal outcome maps to in the graph.
    pub fn device_status(&self) -> DeviceStatus {
        match self.outcome {
            TerminalResult::Succeeded => DeviceStatus::Active,
            // The intent never converged; the device stays pending.
            TerminalResult::Failed => DeviceStatus::Provisioning,
            // Rolled back: flag for operator attention.
            TerminalResult::RolledBack => DeviceStatus::Maintenance,
        }
    }
}

/// Client for the source-of-truth graph.
#[async_trait]
pub trait SotClient: Send + Sync {
    /// Fetch the intended state for a device, with its version tag.
    async fn fetch_intent(&self, device: &str) -> Result<VersionedIntent, SotError>;

    /// Record a run outcome against the device.
    async fn update_status(&self, device: &str, update: StatusUpdate) -> Result<(), SotError>;
}

// ---------------------------------------------------------------------------
// HTTP GraphQL adapter
// ---------------------------------------------------------------------------

const QUERY_DEVICE_INTENT: &str = r#"
query DeviceIntent($hostname: String!) {
    device(name: $hostname) {
        hostname
        managementAddr
        asn
        routerId
        version
        interfaces { name description mtu address enabled }
        bgpSessions { description localAsn remoteAsn localIp remoteIp peerGroup }
    }
}
"#;

const MUTATION_UPDATE_STATUS: &str = r#"
mutation UpdateDeviceStatus($hostname: String!, $status: String!, $detail: String) {
    deviceStatusUpdate(name: $hostname, status: $status, detail: $detail) {
        ok
    }
}
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDoc {
    hostname: String,
    management_addr: String,
    asn: u32,
    router_id: String,
    #[serde(default)]
    version: Option<String>,
    interfaces: Vec<InterfaceDoc>,
    bgp_sessions: Vec<BgpSessionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceDoc {
    name: String,
    #[serde(default)]
    description: String,
    mtu: u16,
    #[serde(default)]
    address: Option<String>,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BgpSessionDoc {
    #[serde(default)]
    description: String,
    local_asn: u32,
    remote_asn: u32,
    local_ip: String,
    remote_ip: String,
    peer_group: String,
}

impl DeviceDoc {
    fn into_versioned(self) -> VersionedIntent {
        let intent = DeviceIntent {
            hostname: self.hostname,
            management_addr: self.management_addr,
            asn: self.asn,
            router_id: self.router_id,
            interfaces: self
                .interfaces
                .into_iter()
                .map(|i| crate::domain::InterfaceIntent {
                    name: i.name,
                    description: i.description,
                    mtu: i.mtu,
                    address: i.address,
                    enabled: i.enabled,
                })
                .collect(),
            bgp_sessions: self
                .bgp_sessions
                .into_iter()
                .map(|s| crate::domain::BgpSessionIntent {
                    description: s.description,
                    local_asn: s.local_asn,
                    remote_asn: s.remote_asn,
                    local_ip: s.local_ip,
                    remote_ip: s.remote_ip,
                    peer_group: s.peer_group,
                })
                .collect(),
        };
        // Fall back to a content digest when the graph exposes no explicit
        // version tag; both are opaque to the pipeline.
        let version = match self.version {
            Some(v) => v,
            None => ContentDigest::from_json(
                &serde_json::to_value(&intent).unwrap_or(serde_json::Value::Null),
            )
            .as_str()
            .to_string(),
        };
        VersionedIntent { intent, version }
    }
}

/// GraphQL-over-HTTP adapter for the source-of-truth service.
pub struct HttpSotClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpSotClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            http: reqwest::Client::new(),
        }
    }

    async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, SotError> {
        let url = format!("{}/graphql", self.base_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(&url)
            .json(&json!({"query": query, "variables": variables}));
        if let Some(token) = &self.token {
            req = req.header("X-API-KEY", token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SotError::Unreachable(e.to_string())
            } else {
                SotError::Protocol(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(SotError::Unreachable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SotError::Protocol(format!("HTTP {}", status)));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SotError::Protocol(e.to_string()))?;

        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(SotError::Protocol(errors[0].to_string()));
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl SotClient for HttpSotClient {
    async fn fetch_intent(&self, device: &str) -> Result<VersionedIntent, SotError> {
        debug!(device = %device, "fetching intended state");
        let body = self
            .graphql(QUERY_DEVICE_INTENT, json!({"hostname": device}))
            .await?;

        let doc = body
            .get("data")
            .and_then(|d| d.get("device"))
            .filter(|d| !d.is_null())
            .ok_or_else(|| SotError::DeviceNotFound {
                hostname: device.to_string(),
            })?;

        let doc: DeviceDoc = serde_json::from_value(doc.clone())
            .map_err(|e| SotError::Protocol(format!("malformed device document: {}", e)))?;

        Ok(doc.into_versioned())
    }

    async fn update_status(&self, device: &str, update: StatusUpdate) -> Result<(), SotError> {
        debug!(device = %device, outcome = ?update.outcome, "updating device status");
        self.graphql(
            MUTATION_UPDATE_STATUS,
            json!({
                "hostname": device,
                "status": update.device_status().as_str(),
                "detail": update.detail,
            }),
        )
        .await?;
        Ok(())
    }
}
