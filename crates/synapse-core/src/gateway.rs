//! Device gateway interface.
//!
//! Thin boundary over get/set of device configuration and operational
//! state. The production transport (gNMI or similar) lives with the
//! embedding platform; the pipeline only depends on this trait.

use async_trait::async_trait;
use serde_json::Value;
use synapse_state::ErrorClass;
use thiserror::Error;

use crate::domain::Retryable;

/// Failure classes reported by the device transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The device could not be reached at all.
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The device refused the payload (malformed or denied).
    #[error("rejected by device: {0}")]
    RejectedByDevice(String),

    /// The request timed out.
    #[error("device request timed out: {0}")]
    Timeout(String),
}

impl GatewayError {
    /// Map the transport failure onto the pipeline error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Unreachable(_) | GatewayError::Timeout(_) => ErrorClass::TransientInfra,
            GatewayError::RejectedByDevice(_) => ErrorClass::RejectedPayload,
        }
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientInfra
    }
}

/// Get/set access to one device's configuration and operational state.
///
/// The orchestrator treats the device as a stateless remote service: no
/// responses are cached across steps.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Read the device's full current configuration.
    async fn read_config(
        &self,
        device: &str,
        management_addr: &str,
    ) -> Result<Value, GatewayError>;

    /// Write a configuration payload to the device.
    async fn write_config(
        &self,
        device: &str,
        management_addr: &str,
        payload: &Value,
    ) -> Result<(), GatewayError>;

    /// Read operational state for a query selector (e.g. the BGP neighbor
    /// subtree).
    async fn read_oper_state(
        &self,
        device: &str,
        management_addr: &str,
        query: &str,
    ) -> Result<Value, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_and_timeout_are_retryable() {
        assert!(GatewayError::Unreachable("no route".into()).is_retryable());
        assert!(GatewayError::Timeout("deadline".into()).is_retryable());
        assert_eq!(
            GatewayError::Timeout("deadline".into()).class(),
            ErrorClass::TransientInfra
        );
    }

    #[test]
    fn device_rejection_is_never_retryable() {
        let err = GatewayError::RejectedByDevice("bad leaf path".into());
        assert!(!err.is_retryable());
        assert_eq!(err.class(), ErrorClass::RejectedPayload);
    }
}
