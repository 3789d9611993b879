//! In-memory protocol client used by the session tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    config::{Configuration, ProtocolVersion, QosLevel},
    error::SessionError,
    protocol::{Connector, EventSink, ProtocolClient, ProtocolEvent, PublishRequest},
};

/// A request observed by the mock client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Publish(PublishRequest),
    Subscribe(String, QosLevel),
    Unsubscribe(String),
    Disconnect,
}

#[derive(Default)]
struct Recorded {
    connects: Vec<Configuration>,
    sinks: Vec<EventSink>,
    calls: Vec<Call>,
    failures: VecDeque<SessionError>,
    request_failures: VecDeque<SessionError>,
}

/// Connector that records every attempt and lets the test play the broker.
#[derive(Clone, Default)]
pub struct MockConnector {
    recorded: Arc<Mutex<Recorded>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.recorded.lock().unwrap().connects.len()
    }

    pub fn last_config(&self) -> Option<Configuration> {
        self.recorded.lock().unwrap().connects.last().cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorded.lock().unwrap().calls.clone()
    }

    /// Makes the next `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: SessionError) {
        self.recorded.lock().unwrap().failures.push_back(error);
    }

    /// Makes the next client request fail with `error` after it is recorded.
    pub fn fail_next_request(&self, error: SessionError) {
        self.recorded.lock().unwrap().request_failures.push_back(error);
    }

    /// Sink of the `n`-th connection attempt (0-based).
    pub fn sink(&self, n: usize) -> EventSink {
        self.recorded.lock().unwrap().sinks[n].clone()
    }

    /// Delivers a broker callback on the most recent connection.
    pub fn emit(&self, event: ProtocolEvent) {
        let sink = self
            .recorded
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("no connection attempt yet");
        assert!(sink.emit(event), "session stopped");
    }

    pub fn accept(&self) {
        self.emit(ProtocolEvent::ConnAck {
            accepted: true,
            reason: "Success".into(),
            details: None,
        });
    }

    pub fn drop_with_error(&self, error: &str) {
        self.emit(ProtocolEvent::Disconnected {
            error: Some(error.into()),
        });
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        config: &Configuration,
        sink: EventSink,
    ) -> Result<Box<dyn ProtocolClient>, SessionError> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.connects.push(config.clone());
        recorded.sinks.push(sink);
        if let Some(error) = recorded.failures.pop_front() {
            return Err(error);
        }
        Ok(Box::new(MockClient {
            version: config.version,
            recorded: self.recorded.clone(),
        }))
    }
}

struct MockClient {
    version: ProtocolVersion,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockClient {
    fn record(&self, call: Call) -> Result<(), SessionError> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.calls.push(call);
        match recorded.request_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn version(&self) -> ProtocolVersion {
        self.version
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), SessionError> {
        self.record(Call::Publish(request))
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SessionError> {
        self.record(Call::Subscribe(topic.to_string(), qos))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.record(Call::Unsubscribe(topic.to_string()))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.record(Call::Disconnect)
    }
}
