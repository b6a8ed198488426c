//! Pre-deployment configuration hygiene gate.
//!
//! Evaluates a [`RenderedConfig`] against a [`HygieneRuleSet`] to produce a
//! [`HygieneReport`], the pass/fail decision that blocks or allows a
//! deployment. Pure and deterministic: no I/O, no side effects, so it runs
//! synchronously inside the pipeline without its own retry/timeout policy.
//!
//! All enabled rules run and all violations are collected before returning;
//! there is no short-circuiting.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::RenderedConfig;
use crate::net::{host_bits_set, parse_host_addr, parse_prefix};

// ---------------------------------------------------------------------------
// Violations and report
// ---------------------------------------------------------------------------

/// Violation severity. Only blocking violations fail the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

/// A single hygiene violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygieneViolation {
    /// Stable rule identifier (e.g. "empty-peer-group").
    pub rule: String,
    pub severity: Severity,
    /// Human-readable explanation.
    pub message: String,
    /// Offending location within the payload.
    pub path: String,
}

impl HygieneViolation {
    fn blocking(rule: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Blocking,
            message: message.into(),
            path: path.into(),
        }
    }

    fn advisory(rule: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Advisory,
            message: message.into(),
            path: path.into(),
        }
    }
}

/// Result of validating a rendered configuration. Created once per gate
/// evaluation, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygieneReport {
    /// Derived from the violation list: false iff any violation is blocking.
    pub pass: bool,
    /// All violations found, in payload order.
    pub violations: Vec<HygieneViolation>,
}

impl HygieneReport {
    /// Build a report, deriving the pass flag from the violations. This is
    /// the only constructor, so the "blocking implies fail" invariant holds
    /// by construction.
    pub fn from_violations(violations: Vec<HygieneViolation>) -> Self {
        let pass = !violations.iter().any(|v| v.severity == Severity::Blocking);
        Self { pass, violations }
    }

    /// Number of blocking violations.
    pub fn blocking_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Blocking)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Hygiene rule categories. Each is independently togglable and
/// independently reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HygieneRule {
    /// ASN fields present and within the declared 16/32-bit range.
    AsnRange,
    /// Peer-group references resolve; no group has zero members.
    PeerGroups,
    /// Neighbor addresses are valid host addresses and do not collide with
    /// the device's own addresses.
    PeerAddresses,
    /// Interface references in routing sections exist in the interface
    /// section.
    InterfaceRefs,
    /// Prefixes parse as CIDR; network prefixes have no host bits.
    Prefixes,
    /// Interfaces and BGP groups carry descriptions (advisory).
    Descriptions,
}

/// An ordered set of enabled hygiene rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygieneRuleSet {
    rules: Vec<HygieneRule>,
}

impl HygieneRuleSet {
    /// All rules enabled, the production gate.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                HygieneRule::AsnRange,
                HygieneRule::PeerGroups,
                HygieneRule::PeerAddresses,
                HygieneRule::InterfaceRefs,
                HygieneRule::Prefixes,
                HygieneRule::Descriptions,
            ],
        }
    }

    /// An empty rule set.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// Enable a rule.
    pub fn with_rule(mut self, rule: HygieneRule) -> Self {
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        self
    }

    /// Disable a rule.
    pub fn without_rule(mut self, rule: HygieneRule) -> Self {
        self.rules.retain(|r| *r != rule);
        self
    }

    /// Evaluate a rendered configuration. Every enabled rule runs; all
    /// violations are collected before returning.
    pub fn evaluate(&self, config: &RenderedConfig) -> HygieneReport {
        let payload = &config.payload;
        let mut violations = Vec::new();

        for rule in &self.rules {
            match rule {
                HygieneRule::AsnRange => check_asn_range(payload, &mut violations),
                HygieneRule::PeerGroups => check_peer_groups(payload, &mut violations),
                HygieneRule::PeerAddresses => check_peer_addresses(payload, &mut violations),
                HygieneRule::InterfaceRefs => check_interface_refs(payload, &mut violations),
                HygieneRule::Prefixes => check_prefixes(payload, &mut violations),
                HygieneRule::Descriptions => check_descriptions(payload, &mut violations),
            }
        }

        HygieneReport::from_violations(violations)
    }
}

impl Default for HygieneRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Payload traversal helpers
// ---------------------------------------------------------------------------

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn network_instances(payload: &Value) -> &[Value] {
    array(payload, "network-instance")
}

fn bgp<'a>(ni: &'a Value) -> Option<&'a Value> {
    ni.get("protocols").and_then(|p| p.get("bgp"))
}

fn ni_name(ni: &Value) -> &str {
    string(ni, "name").unwrap_or("?")
}

/// Interface names defined in the payload's interface section.
fn defined_interfaces(payload: &Value) -> BTreeSet<String> {
    array(payload, "interface")
        .iter()
        .filter_map(|i| string(i, "name"))
        .map(str::to_string)
        .collect()
}

/// The device's own addresses, collected from every subinterface, with
/// prefix lengths stripped.
fn own_addresses(payload: &Value) -> BTreeSet<String> {
    let mut addrs = BTreeSet::new();
    for iface in array(payload, "interface") {
        for sub in array(iface, "subinterface") {
            for family in ["ipv4", "ipv6"] {
                if let Some(fam) = sub.get(family) {
                    for addr in array(fam, "address") {
                        if let Some(prefix) = string(addr, "ip-prefix") {
                            let host = prefix.split_once('/').map_or(prefix, |(h, _)| h);
                            addrs.insert(host.to_string());
                        }
                    }
                }
            }
        }
    }
    addrs
}

// ---------------------------------------------------------------------------
// Rule implementations
// ---------------------------------------------------------------------------

/// Valid ASN range for a declared byte width (2 or 4; 4 when undeclared).
fn asn_in_range(asn: u64, byte_width: u64) -> bool {
    match byte_width {
        2 => (1..=0xFFFF).contains(&asn),
        _ => (1..=0xFFFF_FFFF).contains(&asn),
    }
}

fn check_asn_range(payload: &Value, out: &mut Vec<HygieneViolation>) {
    for ni in network_instances(payload) {
        let Some(bgp) = bgp(ni) else { continue };
        let base = format!("/network-instance[{}]/protocols/bgp", ni_name(ni));
        let width = bgp
            .get("asn-byte-width")
            .and_then(Value::as_u64)
            .unwrap_or(4);

        match bgp.get("autonomous-system").and_then(Value::as_u64) {
            None => out.push(HygieneViolation::blocking(
                "asn-range",
                format!("{}/autonomous-system", base),
                "autonomous-system is missing or not a number",
            )),
            Some(asn) if !asn_in_range(asn, width) => out.push(HygieneViolation::blocking(
                "asn-range",
                format!("{}/autonomous-system", base),
                format!("ASN {} outside the {}-byte range", asn, width),
            )),
            Some(_) => {}
        }

        for nbr in array(bgp, "neighbor") {
            let peer = string(nbr, "peer-address").unwrap_or("?");
            let path = format!("{}/neighbor[{}]/peer-as", base, peer);
            match nbr.get("peer-as").and_then(Value::as_u64) {
                None => out.push(HygieneViolation::blocking(
                    "asn-range",
                    path,
                    "peer-as is missing or not a number",
                )),
                Some(asn) if !asn_in_range(asn, width) => {
                    out.push(HygieneViolation::blocking(
                        "asn-range",
                        path,
                        format!("peer ASN {} outside the {}-byte range", asn, width),
                    ));
                }
                Some(_) => {}
            }
        }
    }
}

fn check_peer_groups(payload: &Value, out: &mut Vec<HygieneViolation>) {
    for ni in network_instances(payload) {
        let Some(bgp) = bgp(ni) else { continue };
        let base = format!("/network-instance[{}]/protocols/bgp", ni_name(ni));

        let defined: BTreeSet<&str> = array(bgp, "group")
            .iter()
            .filter_map(|g| string(g, "group-name"))
            .collect();

        let mut members: BTreeMap<&str, usize> =
            defined.iter().map(|name| (*name, 0usize)).collect();

        for nbr in array(bgp, "neighbor") {
            let peer = string(nbr, "peer-address").unwrap_or("?");
            match string(nbr, "peer-group") {
                Some(group) if defined.contains(group) => {
                    *members.entry(group).or_insert(0) += 1;
                }
                Some(group) => out.push(HygieneViolation::blocking(
                    "dangling-peer-group",
                    format!("{}/neighbor[{}]/peer-group", base, peer),
                    format!("peer group '{}' is not defined in this payload", group),
                )),
                None => out.push(HygieneViolation::blocking(
                    "dangling-peer-group",
                    format!("{}/neighbor[{}]/peer-group", base, peer),
                    "neighbor does not reference a peer group",
                )),
            }
        }

        for (group, count) in members {
            if count == 0 {
                out.push(HygieneViolation::blocking(
                    "empty-peer-group",
                    format!("{}/group[{}]", base, group),
                    format!("peer group '{}' has zero members", group),
                ));
            }
        }
    }
}

fn check_peer_addresses(payload: &Value, out: &mut Vec<HygieneViolation>) {
    let own = own_addresses(payload);
    for ni in network_instances(payload) {
        let Some(bgp) = bgp(ni) else { continue };
        let base = format!("/network-instance[{}]/protocols/bgp", ni_name(ni));

        for nbr in array(bgp, "neighbor") {
            let peer = string(nbr, "peer-address").unwrap_or("");
            let path = format!("{}/neighbor[{}]/peer-address", base, peer);
            if parse_host_addr(peer).is_none() {
                out.push(HygieneViolation::blocking(
                    "invalid-peer-address",
                    path,
                    format!("'{}' is not a valid host address", peer),
                ));
            } else if own.contains(peer) {
                out.push(HygieneViolation::blocking(
                    "peer-address-collision",
                    path,
                    format!("peer address {} is one of the device's own addresses", peer),
                ));
            }
        }
    }
}

fn check_interface_refs(payload: &Value, out: &mut Vec<HygieneViolation>) {
    let defined = defined_interfaces(payload);
    for ni in network_instances(payload) {
        for iface in array(ni, "interface") {
            let Some(name) = string(iface, "name") else {
                continue;
            };
            // Network-instance members are subinterfaces ("ethernet-1/1.0");
            // the base interface must exist in the interface section.
            let base_name = name.rsplit_once('.').map_or(name, |(base, _)| base);
            if !defined.contains(base_name) {
                out.push(HygieneViolation::blocking(
                    "unknown-interface",
                    format!("/network-instance[{}]/interface[{}]", ni_name(ni), name),
                    format!("interface '{}' is not defined in the interface section", base_name),
                ));
            }
        }
    }
}

fn check_prefixes(payload: &Value, out: &mut Vec<HygieneViolation>) {
    // Interface addresses: must parse as CIDR. Host bits are expected here.
    for iface in array(payload, "interface") {
        let iface_name = string(iface, "name").unwrap_or("?");
        for sub in array(iface, "subinterface") {
            for family in ["ipv4", "ipv6"] {
                let Some(fam) = sub.get(family) else { continue };
                for addr in array(fam, "address") {
                    let Some(prefix) = string(addr, "ip-prefix") else {
                        continue;
                    };
                    if parse_prefix(prefix).is_none() {
                        out.push(HygieneViolation::blocking(
                            "invalid-prefix",
                            format!("/interface[{}]/subinterface/{}", iface_name, family),
                            format!("'{}' is not a valid CIDR prefix", prefix),
                        ));
                    }
                }
            }
        }
    }

    // Static routes are network prefixes: must parse and carry no host bits.
    for ni in network_instances(payload) {
        let Some(routes) = ni.get("static-routes") else {
            continue;
        };
        for route in array(routes, "route") {
            let Some(prefix) = string(route, "prefix") else {
                continue;
            };
            let path = format!(
                "/network-instance[{}]/static-routes/route[{}]",
                ni_name(ni),
                prefix
            );
            match parse_prefix(prefix) {
                None => out.push(HygieneViolation::blocking(
                    "invalid-prefix",
                    path,
                    format!("'{}' is not a valid CIDR prefix", prefix),
                )),
                Some((addr, len)) if host_bits_set(addr, len) => {
                    out.push(HygieneViolation::blocking(
                        "host-bits-set",
                        path,
                        format!("network prefix '{}' has host bits set", prefix),
                    ));
                }
                Some(_) => {}
            }
        }
    }
}

fn check_descriptions(payload: &Value, out: &mut Vec<HygieneViolation>) {
    for iface in array(payload, "interface") {
        let name = string(iface, "name").unwrap_or("?");
        if string(iface, "description").map_or(true, str::is_empty) {
            out.push(HygieneViolation::advisory(
                "missing-description",
                format!("/interface[{}]", name),
                format!("interface '{}' has no description", name),
            ));
        }
    }
    for ni in network_instances(payload) {
        let Some(bgp) = bgp(ni) else { continue };
        for group in array(bgp, "group") {
            let name = string(group, "group-name").unwrap_or("?");
            if string(group, "description").map_or(true, str::is_empty) {
                out.push(HygieneViolation::advisory(
                    "missing-description",
                    format!(
                        "/network-instance[{}]/protocols/bgp/group[{}]",
                        ni_name(ni),
                        name
                    ),
                    format!("BGP group '{}' has no description", name),
                ));
            }
        }
    }
}
