//! Intended-state model fetched from the source-of-truth graph.
//!
//! Two layers, mirroring the graph's data shapes: device metadata plus the
//! interface and BGP-session collections the renderer consumes. The version
//! tag travels alongside so staleness can be detected downstream.

use serde::{Deserialize, Serialize};

/// Intended configuration for one device, as recorded in the
/// source-of-truth graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIntent {
    /// Device hostname.
    pub hostname: String,
    /// Management address.
    pub management_addr: String,
    /// Local autonomous system number.
    pub asn: u32,
    /// Router id (bare IP, no prefix length).
    pub router_id: String,
    /// Intended interfaces.
    pub interfaces: Vec<InterfaceIntent>,
    /// Intended BGP sessions.
    pub bgp_sessions: Vec<BgpSessionIntent>,
}

/// One intended interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceIntent {
    /// Interface name (e.g. "ethernet-1/1").
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mtu: u16,
    /// Address in CIDR notation, if the interface is routed.
    pub address: Option<String>,
    pub enabled: bool,
}

/// One intended BGP session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpSessionIntent {
    #[serde(default)]
    pub description: String,
    pub local_asn: u32,
    pub remote_asn: u32,
    /// Local session address, CIDR notation as stored in the graph.
    pub local_ip: String,
    /// Remote session address, CIDR notation as stored in the graph.
    pub remote_ip: String,
    pub peer_group: String,
}

/// A device intent together with the opaque version tag it was fetched at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedIntent {
    pub intent: DeviceIntent,
    /// Opaque version/etag from the source of truth, used for staleness
    /// detection and render idempotence.
    pub version: String,
}

/// Strip the prefix length from a CIDR address: "10.0.0.1/31" -> "10.0.0.1".
pub fn strip_prefix_len(addr: &str) -> &str {
    addr.split_once('/').map_or(addr, |(host, _)| host)
}
