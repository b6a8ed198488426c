//! Post-deploy convergence predicates over device operational state.

use serde_json::Value;
use tracing::{info, warn};

/// Operational-state query selector for the BGP neighbor subtree.
pub const BGP_NEIGHBOR_STATE_QUERY: &str =
    "/network-instance[name=default]/protocols/bgp/neighbor";

/// Whether every BGP session in an operational-state document reports
/// `established`.
///
/// The neighbor block may arrive as a list or as a keyed map depending on
/// the transport encoding. Missing or empty neighbor data is a failed
/// check, not a pass: a device with no sessions after a BGP change has not
/// converged.
pub fn bgp_sessions_established(device: &str, state: &Value) -> bool {
    let peers: Vec<&Value> = match state {
        Value::Array(list) => list.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => {
            warn!(device = %device, "unexpected operational-state shape");
            return false;
        }
    };

    if peers.is_empty() {
        warn!(device = %device, "no BGP neighbors in operational state");
        return false;
    }

    let mut all_ok = true;
    for peer in peers {
        let addr = peer
            .get("peer-address")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let session_state = peer
            .get("session-state")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        if session_state.eq_ignore_ascii_case("established") {
            info!(device = %device, peer = %addr, "BGP session established");
        } else {
            warn!(device = %device, peer = %addr, state = %session_state, "BGP session not established");
            all_ok = false;
        }
    }
    all_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_established_list_passes() {
        let state = json!([
            {"peer-address": "10.0.0.1", "session-state": "established"},
            {"peer-address": "10.0.0.3", "session-state": "ESTABLISHED"},
        ]);
        assert!(bgp_sessions_established("spine01", &state));
    }

    #[test]
    fn keyed_map_encoding_is_accepted() {
        let state = json!({
            "10.0.0.1": {"peer-address": "10.0.0.1", "session-state": "established"},
        });
        assert!(bgp_sessions_established("spine01", &state));
    }

    #[test]
    fn one_idle_session_fails_the_check() {
        let state = json!([
            {"peer-address": "10.0.0.1", "session-state": "established"},
            {"peer-address": "10.0.0.3", "session-state": "idle"},
        ]);
        assert!(!bgp_sessions_established("spine01", &state));
    }

    #[test]
    fn empty_or_missing_neighbor_data_fails() {
        assert!(!bgp_sessions_established("spine01", &json!([])));
        assert!(!bgp_sessions_established("spine01", &Value::Null));
    }
}
