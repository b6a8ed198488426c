//! In-memory fakes for the pipeline's collaborator interfaces (testing only)
//!
//! Every step dependency is a capability interface with a fake here and a
//! real adapter elsewhere, so nothing in the orchestrator is hard-wired to a
//! concrete backend. The gateway fake records every call so tests can assert
//! on write ordering and payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::domain::{DeviceIntent, RenderedConfig, VersionedIntent};
use crate::gateway::{DeviceGateway, GatewayError};
use crate::render::{ConfigRenderer, RenderError};
use crate::sot::{SotClient, SotError, StatusUpdate};

// ---------------------------------------------------------------------------
// FakeDeviceGateway
// ---------------------------------------------------------------------------

/// One recorded gateway invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    ReadConfig,
    WriteConfig { payload: Value },
    ReadOperState { query: String },
}

/// Scripted device gateway.
///
/// Holds a mutable "running config" that writes replace, queues of errors to
/// inject per operation, and a queue of operational-state documents served
/// to polls (falling back to a default once drained).
#[derive(Debug, Default)]
pub struct FakeDeviceGateway {
    running_config: Mutex<Value>,
    read_errors: Mutex<VecDeque<GatewayError>>,
    write_errors: Mutex<VecDeque<GatewayError>>,
    oper_states: Mutex<VecDeque<Value>>,
    oper_default: Mutex<Value>,
    calls: Mutex<Vec<GatewayCall>>,
    hold_writes: AtomicBool,
    write_release: Notify,
}

impl FakeDeviceGateway {
    pub fn new(running_config: Value) -> Self {
        Self {
            running_config: Mutex::new(running_config),
            ..Self::default()
        }
    }

    /// Queue an error for the next `read_config` call.
    pub fn push_read_error(&self, err: GatewayError) {
        self.read_errors.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `write_config` call.
    pub fn push_write_error(&self, err: GatewayError) {
        self.write_errors.lock().unwrap().push_back(err);
    }

    /// Queue an operational-state document for the next poll.
    pub fn push_oper_state(&self, state: Value) {
        self.oper_states.lock().unwrap().push_back(state);
    }

    /// Operational state served once the queue is drained.
    pub fn set_oper_default(&self, state: Value) {
        *self.oper_default.lock().unwrap() = state;
    }

    /// Block `write_config` calls until [`FakeDeviceGateway::release_writes`].
    pub fn hold_writes(&self) {
        self.hold_writes.store(true, Ordering::SeqCst);
    }

    /// Unblock held writes.
    pub fn release_writes(&self) {
        self.hold_writes.store(false, Ordering::SeqCst);
        self.write_release.notify_waiters();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Payloads passed to `write_config`, in order.
    pub fn write_payloads(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::WriteConfig { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Number of `write_config` invocations.
    pub fn write_count(&self) -> usize {
        self.write_payloads().len()
    }

    /// The device's current running configuration.
    pub fn running_config(&self) -> Value {
        self.running_config.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceGateway for FakeDeviceGateway {
    async fn read_config(&self, _device: &str, _addr: &str) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::ReadConfig);
        if let Some(err) = self.read_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.running_config())
    }

    async fn write_config(
        &self,
        _device: &str,
        _addr: &str,
        payload: &Value,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::WriteConfig {
            payload: payload.clone(),
        });
        // A scripted error is claimed at call entry, before any hold, so a
        // held write keeps the outcome it entered with.
        let scripted = self.write_errors.lock().unwrap().pop_front();
        while self.hold_writes.load(Ordering::SeqCst) {
            self.write_release.notified().await;
        }
        if let Some(err) = scripted {
            return Err(err);
        }
        *self.running_config.lock().unwrap() = payload.clone();
        Ok(())
    }

    async fn read_oper_state(
        &self,
        _device: &str,
        _addr: &str,
        query: &str,
    ) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::ReadOperState {
            query: query.to_string(),
        });
        if let Some(state) = self.oper_states.lock().unwrap().pop_front() {
            return Ok(state);
        }
        Ok(self.oper_default.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// FakeSotClient
// ---------------------------------------------------------------------------

/// Scripted source-of-truth client: a map of device intents plus error
/// queues and a log of received status updates.
#[derive(Debug, Default)]
pub struct FakeSotClient {
    intents: Mutex<HashMap<String, VersionedIntent>>,
    fetch_errors: Mutex<VecDeque<SotError>>,
    status_errors: Mutex<VecDeque<SotError>>,
    updates: Mutex<Vec<(String, StatusUpdate)>>,
}

impl FakeSotClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an intent for a device.
    pub fn with_intent(self, intent: DeviceIntent, version: impl Into<String>) -> Self {
        self.intents.lock().unwrap().insert(
            intent.hostname.clone(),
            VersionedIntent {
                intent,
                version: version.into(),
            },
        );
        self
    }

    /// Queue an error for the next `fetch_intent` call.
    pub fn push_fetch_error(&self, err: SotError) {
        self.fetch_errors.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `update_status` call.
    pub fn push_status_error(&self, err: SotError) {
        self.status_errors.lock().unwrap().push_back(err);
    }

    /// Status updates received so far.
    pub fn updates(&self) -> Vec<(String, StatusUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SotClient for FakeSotClient {
    async fn fetch_intent(&self, device: &str) -> Result<VersionedIntent, SotError> {
        if let Some(err) = self.fetch_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.intents
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .ok_or_else(|| SotError::DeviceNotFound {
                hostname: device.to_string(),
            })
    }

    async fn update_status(&self, device: &str, update: StatusUpdate) -> Result<(), SotError> {
        if let Some(err) = self.status_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.updates
            .lock()
            .unwrap()
            .push((device.to_string(), update));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticRenderer
// ---------------------------------------------------------------------------

/// Renderer returning a canned payload regardless of intent, or a scripted
/// failure.
#[derive(Debug, Clone)]
pub struct StaticRenderer {
    payload: Value,
    fail: Option<String>,
}

impl StaticRenderer {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            fail: None,
        }
    }

    /// A renderer that always fails with the given message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            payload: Value::Null,
            fail: Some(message.into()),
        }
    }
}

impl ConfigRenderer for StaticRenderer {
    fn render(&self, intent: &DeviceIntent, version: &str) -> Result<RenderedConfig, RenderError> {
        if let Some(message) = &self.fail {
            return Err(RenderError::InvalidIntent(message.clone()));
        }
        Ok(RenderedConfig::new(
            &intent.hostname,
            self.payload.clone(),
            version,
        ))
    }
}
