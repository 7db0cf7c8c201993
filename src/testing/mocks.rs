//! Mock implementations for testing
//!
//! In-memory stand-ins for the broker connection, the process probe and the tick
//! handler, so the sentinel can be driven end to end without a broker or a real
//! broker process.

use crate::monitor::TickHandler;
use crate::probe::{ProbeError, ProcessProbe};
use crate::transport::{InboundMessage, MessageSink, SubscriberFactory, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing_subscriber::fmt::MakeWriter;

pub type PublishedMessage = (String, Vec<u8>);

/// Errors raised by [`MockTransport`]
#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("Mock broker refused the connection")]
    ConnectRefused,
    #[error("Mock transport not connected")]
    NotConnected,
}

#[derive(Debug, Default)]
struct MockBrokerState {
    /// Outcomes for upcoming connect attempts; exhausted means success
    connect_outcomes: VecDeque<bool>,
    connect_attempts: usize,
    next_transport_id: usize,
    /// Id of the transport currently holding the connection
    connected: Option<usize>,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    latest_sink: Option<MessageSink>,
}

/// Shared view of every transport created against one mock broker
#[derive(Debug, Clone)]
pub struct MockBrokerHandle {
    state: Arc<Mutex<MockBrokerState>>,
    /// `false` parks every publish until reopened
    publish_gate: Arc<watch::Sender<bool>>,
}

impl Default for MockBrokerHandle {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            publish_gate: Arc::new(watch::channel(true).0),
        }
    }
}

impl MockBrokerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park publishes until `release_publishes`, like a broker that stopped reading
    pub fn hold_publishes(&self) {
        self.publish_gate.send_replace(false);
    }

    pub fn release_publishes(&self) {
        self.publish_gate.send_replace(true);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockBrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue outcomes for the next connect attempts, in order
    pub fn push_connect_outcomes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.lock().connect_outcomes.extend(outcomes);
    }

    /// Simulate the broker dropping the current connection
    pub fn drop_connection(&self) {
        self.lock().connected = None;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Payloads published to `topic`, oldest first
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear_published(&self) {
        self.lock().published.clear();
    }

    /// Deliver a message as if the broker routed it to the latest transport
    pub async fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let sink = self.lock().latest_sink.clone();
        match sink {
            Some(sink) => sink
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    id: usize,
    handle: MockBrokerHandle,
}

impl MockTransport {
    /// A transport on its own mock broker
    pub fn new(sink: MessageSink) -> Self {
        Self::with_handle(MockBrokerHandle::new(), sink)
    }

    /// A transport on a shared mock broker
    pub fn with_handle(handle: MockBrokerHandle, sink: MessageSink) -> Self {
        let id = {
            let mut state = handle.lock();
            state.next_transport_id += 1;
            state.latest_sink = Some(sink);
            state.next_transport_id
        };
        Self { id, handle }
    }

    pub fn with_connect_outcomes(self, outcomes: Vec<bool>) -> Self {
        self.handle.push_connect_outcomes(outcomes);
        self
    }

    pub fn handle(&self) -> MockBrokerHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.handle.lock();
        state.connect_attempts += 1;

        if state.connect_outcomes.pop_front().unwrap_or(true) {
            state.connected = Some(self.id);
            Ok(())
        } else {
            Err(MockTransportError::ConnectRefused)
        }
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.handle.lock();
        if state.connected == Some(self.id) {
            state.connected = None;
        }
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        let mut state = self.handle.lock();
        if state.connected != Some(self.id) {
            return Err(MockTransportError::NotConnected);
        }
        state.subscriptions.push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _retain: bool,
    ) -> Result<(), Self::Error> {
        let mut gate = self.handle.publish_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.handle.lock();
        if state.connected != Some(self.id) {
            return Err(MockTransportError::NotConnected);
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.lock().connected == Some(self.id)
    }
}

/// Factory producing [`MockTransport`]s on one shared mock broker
#[derive(Debug, Clone, Default)]
pub struct MockSubscriberFactory {
    handle: MockBrokerHandle,
}

impl MockSubscriberFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_outcomes(self, outcomes: Vec<bool>) -> Self {
        self.handle.push_connect_outcomes(outcomes);
        self
    }

    pub fn handle(&self) -> MockBrokerHandle {
        self.handle.clone()
    }
}

impl SubscriberFactory for MockSubscriberFactory {
    type Transport = MockTransport;

    fn create(&self, sink: MessageSink) -> MockTransport {
        MockTransport::with_handle(self.handle.clone(), sink)
    }
}

/// Probe returning scripted answers
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Result<bool, ProbeError>>>,
    fallback: bool,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    /// Always answers `running`
    pub fn always(running: bool) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: running,
            calls: Mutex::new(0),
        }
    }

    /// Answers from `script` in order, then repeats the last successful answer
    pub fn sequence(script: Vec<Result<bool, ProbeError>>) -> Self {
        let fallback = script
            .iter()
            .rev()
            .find_map(|answer| answer.as_ref().ok().copied())
            .unwrap_or(false);

        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessProbe for ScriptedProbe {
    fn is_running(&self, _name: &str) -> Result<bool, ProbeError> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }

    fn probe_name(&self) -> &str {
        "scripted"
    }
}

/// Tick handler recording every probe result it receives
#[derive(Debug, Default)]
pub struct RecordingTickHandler {
    ticks: Mutex<Vec<bool>>,
    notify: Notify,
}

impl RecordingTickHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> Vec<bool> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` ticks were recorded or `timeout` elapses
    pub async fn wait_for_ticks(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.ticks.lock().unwrap_or_else(PoisonError::into_inner).len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl TickHandler for RecordingTickHandler {
    async fn on_tick(&self, process_running: bool) {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(process_running);
        self.notify.notify_waiters();
    }
}

/// In-memory sink for formatted log lines
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain-text subscriber writing into this sink; install with `set_default`
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }

    /// Number of captured lines containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
