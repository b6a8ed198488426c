//! Config renderer interface and the SR Linux-shaped reference renderer.
//!
//! Rendering must be deterministic: the same intent and version tag always
//! produce byte-identical output. The reference renderer guarantees this by
//! building the payload through `serde_json`'s ordered maps instead of a
//! template pass.

use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::{strip_prefix_len, DeviceIntent, RenderedConfig};
use crate::net::{parse_host_addr, parse_prefix};

/// Rendering failures. Always deterministic for a given intent, so never
/// retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("malformed intended state: {0}")]
    InvalidIntent(String),
}

/// Turns intended state into a device-native payload.
pub trait ConfigRenderer: Send + Sync {
    /// Render a payload for `intent` at `version`.
    fn render(&self, intent: &DeviceIntent, version: &str) -> Result<RenderedConfig, RenderError>;
}

/// Reference renderer producing the SR Linux JSON shape: an `interface`
/// list plus a default network-instance carrying the BGP subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrlConfigRenderer;

impl SrlConfigRenderer {
    pub fn new() -> Self {
        Self
    }

    fn validate(intent: &DeviceIntent) -> Result<(), RenderError> {
        if intent.asn == 0 {
            return Err(RenderError::InvalidIntent(format!(
                "device {} has no ASN",
                intent.hostname
            )));
        }
        if parse_host_addr(&intent.router_id).is_none() {
            return Err(RenderError::InvalidIntent(format!(
                "router id '{}' is not a valid address",
                intent.router_id
            )));
        }
        for iface in &intent.interfaces {
            if let Some(addr) = &iface.address {
                if parse_prefix(addr).is_none() {
                    return Err(RenderError::InvalidIntent(format!(
                        "interface {} address '{}' is not CIDR",
                        iface.name, addr
                    )));
                }
            }
        }
        for session in &intent.bgp_sessions {
            if session.remote_ip.is_empty() {
                return Err(RenderError::InvalidIntent(
                    "BGP session without a remote address".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn render_interfaces(intent: &DeviceIntent) -> Value {
        let interfaces: Vec<Value> = intent
            .interfaces
            .iter()
            .map(|iface| {
                let mut entry = json!({
                    "name": iface.name,
                    "description": iface.description,
                    "admin-state": if iface.enabled { "enable" } else { "disable" },
                    "mtu": iface.mtu,
                });
                if let Some(addr) = &iface.address {
                    entry["subinterface"] = json!([
                        {
                            "index": 0,
                            "ipv4": {"address": [{"ip-prefix": addr}]},
                        }
                    ]);
                }
                entry
            })
            .collect();
        Value::Array(interfaces)
    }

    fn render_bgp(intent: &DeviceIntent) -> Value {
        // Groups are derived from the sessions that reference them, in
        // first-reference order.
        let mut group_names: Vec<&str> = Vec::new();
        for session in &intent.bgp_sessions {
            if !group_names.contains(&session.peer_group.as_str()) {
                group_names.push(&session.peer_group);
            }
        }

        let groups: Vec<Value> = group_names
            .iter()
            .map(|name| {
                json!({
                    "group-name": name,
                    "description": format!("{} peer group", name),
                    "export-policy": "export-all",
                    "import-policy": "import-all",
                })
            })
            .collect();

        let neighbors: Vec<Value> = intent
            .bgp_sessions
            .iter()
            .map(|session| {
                json!({
                    "peer-address": strip_prefix_len(&session.remote_ip),
                    "peer-as": session.remote_asn,
                    "peer-group": session.peer_group,
                    "description": session.description,
                })
            })
            .collect();

        json!({
            "autonomous-system": intent.asn,
            "router-id": intent.router_id,
            "group": groups,
            "neighbor": neighbors,
        })
    }
}

impl ConfigRenderer for SrlConfigRenderer {
    fn render(&self, intent: &DeviceIntent, version: &str) -> Result<RenderedConfig, RenderError> {
        Self::validate(intent)?;

        // Every routed interface joins the default network instance as a
        // subinterface member.
        let members: Vec<Value> = intent
            .interfaces
            .iter()
            .filter(|i| i.address.is_some())
            .map(|i| json!({"name": format!("{}.0", i.name)}))
            .collect();

        let payload = json!({
            "interface": Self::render_interfaces(intent),
            "network-instance": [
                {
                    "name": "default",
                    "interface": members,
                    "protocols": {"bgp": Self::render_bgp(intent)},
                }
            ],
        });

        Ok(RenderedConfig::new(&intent.hostname, payload, version))
    }
}
