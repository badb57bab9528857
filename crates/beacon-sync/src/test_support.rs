//! Configurable in-crate mock of [`CloudApi`] for unit tests.
//!
//! Records every call and serves scripted outcomes, so tests can assert both
//! what the component did and what it sent.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::client::CloudApi;
use crate::error::{CloudError, CloudResult};
use beacon_core::{Command, CommandAck, Heartbeat, HttpMethod};

#[derive(Default)]
pub(crate) struct MockCloud {
    /// Scripted outcomes for `execute_operation`, consumed in order.
    /// Exhausted queue means Ok.
    pub exec_results: Mutex<VecDeque<CloudResult<()>>>,
    /// Endpoints passed to `execute_operation`, in call order.
    pub executed: Mutex<Vec<String>>,

    pub heartbeats: Mutex<Vec<Heartbeat>>,

    /// Command batches served per poll, consumed in order. Exhausted = empty.
    pub command_batches: Mutex<VecDeque<Vec<Command>>>,
    /// (command_id, ack) pairs received.
    pub acks: Mutex<Vec<(String, CommandAck)>>,

    /// PEM served by `fetch_public_key`; None simulates an unreachable cloud.
    pub public_key: Mutex<Option<String>>,

    pub probe_online: AtomicBool,
    pub probe_calls: AtomicUsize,
}

impl MockCloud {
    pub fn new() -> Self {
        let mock = MockCloud::default();
        mock.probe_online.store(true, Ordering::SeqCst);
        mock
    }

    pub fn push_exec_result(&self, result: CloudResult<()>) {
        self.exec_results.lock().unwrap().push_back(result);
    }

    pub fn push_commands(&self, batch: Vec<Command>) {
        self.command_batches.lock().unwrap().push_back(batch);
    }

    pub fn set_public_key(&self, pem: Option<&str>) {
        *self.public_key.lock().unwrap() = pem.map(String::from);
    }

    pub fn acks(&self) -> Vec<(String, CommandAck)> {
        self.acks.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn execute_operation(
        &self,
        _method: HttpMethod,
        endpoint: &str,
        _payload: &serde_json::Value,
        _extra_headers: &HashMap<String, String>,
    ) -> CloudResult<()> {
        self.executed.lock().unwrap().push(endpoint.to_string());
        self.exec_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> CloudResult<()> {
        self.heartbeats.lock().unwrap().push(heartbeat.clone());
        Ok(())
    }

    async fn get_pending_commands(&self) -> CloudResult<Vec<Command>> {
        Ok(self
            .command_batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn acknowledge_command(&self, command_id: &str, ack: &CommandAck) -> CloudResult<()> {
        self.acks
            .lock()
            .unwrap()
            .push((command_id.to_string(), ack.clone()));
        Ok(())
    }

    async fn fetch_public_key(&self) -> CloudResult<String> {
        self.public_key
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CloudError::Connection("cloud unreachable".into()))
    }

    async fn probe_health(&self) -> CloudResult<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CloudError::Connection("probe failed".into()))
        }
    }
}
