//! `rumqttc` implementation of the protocol client boundary.
//!
//! This module provides:
//! - `RumqttcConnector`: builds a client for the configured version and spawns its driver
//! - `V311Client` / `V5Client`: request side of a live connection
//! - the drivers: poll the event loop and translate packets into [`ProtocolEvent`]s
//!
//! # Architecture
//!
//! ```text
//! Session actor
//!     ↓ publish / subscribe / unsubscribe / disconnect
//! V311Client | V5Client (rumqttc AsyncClient)
//!     ↓
//! driver task (polls EventLoop, translates packets)
//!     ↓ EventSink
//! Session actor
//! ```
//!
//! A driver stops at the first connection error. Reconnection is owned by the
//! session, so `rumqttc` is never polled again after a failure.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{
    Packet as V5Packet, PublishProperties, SubscribeReasonCode as V5SubscribeReasonCode,
};
use rumqttc::{ConnectReturnCode, ConnectionError, Outgoing, Packet, SubscribeReasonCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    client::{BuiltClient, ClientBuilder},
    config::{Configuration, ProtocolVersion, QosLevel},
    error::SessionError,
    protocol::{Connector, EventSink, ProtocolClient, ProtocolEvent, PublishRequest},
};

/// How long a closing driver keeps polling to flush DISCONNECT.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector backed by `rumqttc`.
#[derive(Debug, Clone, Default)]
pub struct RumqttcConnector {
    /// Overrides the client request channel capacity.
    request_capacity: Option<usize>,
}

impl RumqttcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_capacity(mut self, cap: usize) -> Self {
        self.request_capacity = Some(cap);
        self
    }
}

#[async_trait]
impl Connector for RumqttcConnector {
    async fn connect(
        &self,
        config: &Configuration,
        sink: EventSink,
    ) -> Result<Box<dyn ProtocolClient>, SessionError> {
        let mut builder = ClientBuilder::from_config(config)?;
        if let Some(cap) = self.request_capacity {
            builder = builder.request_capacity(cap);
        }

        let shared = Arc::new(DriverShared {
            sink,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            pending: PendingAcks::default(),
        });

        let client: Box<dyn ProtocolClient> = match builder.build()? {
            BuiltClient::V311(client, event_loop) => {
                tokio::spawn(V311Driver::new(event_loop, shared.clone()).run());
                Box::new(V311Client { client, shared })
            }
            BuiltClient::V5(client, event_loop) => {
                tokio::spawn(V5Driver::new(event_loop, shared.clone()).run());
                Box::new(V5Client { client, shared })
            }
        };
        Ok(client)
    }
}

/// Topic lists awaiting SUBACK / UNSUBACK, in request order.
#[derive(Debug, Default)]
struct PendingAcks {
    subscribe: Mutex<VecDeque<Vec<String>>>,
    unsubscribe: Mutex<VecDeque<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PendingAcks {
    fn push_subscribe(&self, topic: &str) {
        lock(&self.subscribe).push_back(vec![topic.to_string()]);
    }

    fn push_unsubscribe(&self, topic: &str) {
        lock(&self.unsubscribe).push_back(vec![topic.to_string()]);
    }

    /// Forgets the newest request after it failed to queue.
    fn cancel_subscribe(&self) {
        lock(&self.subscribe).pop_back();
    }

    fn cancel_unsubscribe(&self) {
        lock(&self.unsubscribe).pop_back();
    }

    fn next_subscribe(&self) -> Vec<String> {
        lock(&self.subscribe).pop_front().unwrap_or_default()
    }

    fn next_unsubscribe(&self) -> Vec<String> {
        lock(&self.unsubscribe).pop_front().unwrap_or_default()
    }
}

/// State shared between a client handle and its driver.
#[derive(Debug)]
struct DriverShared {
    sink: EventSink,

    /// Stops the driver once the client handle is dropped.
    cancel: CancellationToken,

    /// Set by a user disconnect, so the resulting close is reported as clean.
    closing: AtomicBool,

    pending: PendingAcks,
}

impl DriverShared {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn emit(&self, event: ProtocolEvent) -> bool {
        self.sink.emit(event)
    }
}

/// Request side of an MQTT 3.1.1 connection.
pub struct V311Client {
    client: rumqttc::AsyncClient,
    shared: Arc<DriverShared>,
}

#[async_trait]
impl ProtocolClient for V311Client {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V311
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), SessionError> {
        self.client.try_publish(
            request.topic,
            request.qos.into(),
            request.retain,
            request.payload.to_vec(),
        )?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SessionError> {
        self.shared.pending.push_subscribe(topic);
        if let Err(e) = self.client.try_subscribe(topic, qos.into()) {
            self.shared.pending.cancel_subscribe();
            return Err(e.into());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.shared.pending.push_unsubscribe(topic);
        if let Err(e) = self.client.try_unsubscribe(topic) {
            self.shared.pending.cancel_unsubscribe();
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.shared.closing.store(true, Ordering::Release);
        self.client.try_disconnect()?;
        Ok(())
    }
}

impl Drop for V311Client {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Request side of an MQTT 5.0 connection.
pub struct V5Client {
    client: rumqttc::v5::AsyncClient,
    shared: Arc<DriverShared>,
}

#[async_trait]
impl ProtocolClient for V5Client {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V5
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), SessionError> {
        if request.user_properties.is_empty() {
            self.client.try_publish(
                request.topic,
                request.qos.into(),
                request.retain,
                request.payload,
            )?;
        } else {
            let properties = PublishProperties {
                user_properties: request.user_properties,
                ..Default::default()
            };
            self.client.try_publish_with_properties(
                request.topic,
                request.qos.into(),
                request.retain,
                request.payload,
                properties,
            )?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SessionError> {
        self.shared.pending.push_subscribe(topic);
        if let Err(e) = self.client.try_subscribe(topic, qos.into()) {
            self.shared.pending.cancel_subscribe();
            return Err(e.into());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.shared.pending.push_unsubscribe(topic);
        if let Err(e) = self.client.try_unsubscribe(topic) {
            self.shared.pending.cancel_unsubscribe();
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.shared.closing.store(true, Ordering::Release);
        self.client.try_disconnect()?;
        Ok(())
    }
}

impl Drop for V5Client {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Drives a 3.1.1 event loop until the connection ends or the client is dropped.
struct V311Driver {
    event_loop: rumqttc::EventLoop,
    shared: Arc<DriverShared>,
    connected: bool,
}

impl V311Driver {
    fn new(event_loop: rumqttc::EventLoop, shared: Arc<DriverShared>) -> Self {
        Self {
            event_loop,
            shared,
            connected: false,
        }
    }

    async fn run(mut self) {
        debug!(
            "Starting MQTT 3.1.1 event loop, generation {}",
            self.shared.sink.generation()
        );
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    if self.shared.is_closing() {
                        self.flush_disconnect().await;
                    }
                    debug!("MQTT 3.1.1 driver stopped");
                    return;
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(rumqttc::Event::Incoming(packet)) => {
                        if matches!(packet, Packet::ConnAck(_)) {
                            self.connected = true;
                        }
                        if let Some(event) = translate_v311(packet, &self.shared.pending) {
                            if !self.shared.emit(event) {
                                return;
                            }
                        }
                    }
                    Ok(rumqttc::Event::Outgoing(outgoing)) => {
                        trace!("Outgoing packet: {:?}", outgoing);
                    }
                    Err(e) => {
                        let event = match &e {
                            ConnectionError::ConnectionRefused(code) => ProtocolEvent::ConnAck {
                                accepted: false,
                                reason: format!("{code:?}"),
                                details: None,
                            },
                            _ => close_event(
                                self.shared.is_closing(),
                                self.connected,
                                is_fatal_error(&e),
                                &e,
                            ),
                        };
                        self.shared.emit(event);
                        return;
                    }
                }
            }
        }
    }

    async fn flush_disconnect(&mut self) {
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            while self.event_loop.poll().await.is_ok() {}
        })
        .await;
        if flushed.is_err() {
            warn!("Timed out flushing DISCONNECT");
        }
    }
}

/// Drives a 5.0 event loop until the connection ends or the client is dropped.
struct V5Driver {
    event_loop: rumqttc::v5::EventLoop,
    shared: Arc<DriverShared>,
    connected: bool,
}

impl V5Driver {
    fn new(event_loop: rumqttc::v5::EventLoop, shared: Arc<DriverShared>) -> Self {
        Self {
            event_loop,
            shared,
            connected: false,
        }
    }

    async fn run(mut self) {
        debug!(
            "Starting MQTT 5.0 event loop, generation {}",
            self.shared.sink.generation()
        );
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    if self.shared.is_closing() {
                        self.flush_disconnect().await;
                    }
                    debug!("MQTT 5.0 driver stopped");
                    return;
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(rumqttc::v5::Event::Incoming(packet)) => {
                        if matches!(packet, V5Packet::ConnAck(_)) {
                            self.connected = true;
                        }
                        if let Some(event) = translate_v5(packet, &self.shared.pending) {
                            if !self.shared.emit(event) {
                                return;
                            }
                        }
                    }
                    Ok(rumqttc::v5::Event::Outgoing(Outgoing::Publish(pkid))) => {
                        if !self.shared.emit(ProtocolEvent::Published { pkid }) {
                            return;
                        }
                    }
                    Ok(rumqttc::v5::Event::Outgoing(outgoing)) => {
                        trace!("Outgoing packet: {:?}", outgoing);
                    }
                    Err(e) => {
                        let event = match &e {
                            rumqttc::v5::ConnectionError::ConnectionRefused(code) => {
                                ProtocolEvent::ConnAck {
                                    accepted: false,
                                    reason: format!("{code:?}"),
                                    details: None,
                                }
                            }
                            _ => close_event(
                                self.shared.is_closing(),
                                self.connected,
                                is_fatal_v5_error(&e),
                                &e,
                            ),
                        };
                        self.shared.emit(event);
                        return;
                    }
                }
            }
        }
    }

    async fn flush_disconnect(&mut self) {
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            while self.event_loop.poll().await.is_ok() {}
        })
        .await;
        if flushed.is_err() {
            warn!("Timed out flushing DISCONNECT");
        }
    }
}

/// Picks the event reported when the event loop fails.
///
/// - after a user disconnect: a clean close
/// - before CONNACK with an unrecoverable error: `ConnectFailed`
/// - otherwise: a drop carrying the error
fn close_event(
    closing: bool,
    connected: bool,
    fatal: bool,
    err: &dyn std::error::Error,
) -> ProtocolEvent {
    if closing {
        info!("Connection closed after disconnect request");
        return ProtocolEvent::Disconnected { error: None };
    }

    let message = get_error_message(err);
    if !connected && fatal {
        error!("Fatal error before CONNACK: {message}");
        ProtocolEvent::ConnectFailed { error: message }
    } else {
        warn!("Connection lost: {message}");
        ProtocolEvent::Disconnected {
            error: Some(message),
        }
    }
}

fn qos_level(qos: rumqttc::QoS) -> u8 {
    match qos {
        rumqttc::QoS::AtMostOnce => 0,
        rumqttc::QoS::AtLeastOnce => 1,
        rumqttc::QoS::ExactlyOnce => 2,
    }
}

fn qos_level_v5(qos: rumqttc::v5::mqttbytes::QoS) -> u8 {
    match qos {
        rumqttc::v5::mqttbytes::QoS::AtMostOnce => 0,
        rumqttc::v5::mqttbytes::QoS::AtLeastOnce => 1,
        rumqttc::v5::mqttbytes::QoS::ExactlyOnce => 2,
    }
}

/// Splits a SUBACK into accepted and rejected topics by position.
fn split_by_outcome(topics: Vec<String>, outcomes: &[bool]) -> (Vec<String>, Vec<String>) {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (index, topic) in topics.into_iter().enumerate() {
        if outcomes.get(index).copied().unwrap_or(false) {
            succeeded.push(topic);
        } else {
            failed.push(topic);
        }
    }
    (succeeded, failed)
}

/// Translates an incoming 3.1.1 packet. Packets without a diagnostic meaning map to `None`.
fn translate_v311(packet: Packet, pending: &PendingAcks) -> Option<ProtocolEvent> {
    match packet {
        Packet::ConnAck(ack) => Some(ProtocolEvent::ConnAck {
            accepted: ack.code == ConnectReturnCode::Success,
            reason: format!("{:?}", ack.code),
            details: None,
        }),
        Packet::PubAck(ack) => Some(ProtocolEvent::PubAck {
            pkid: ack.pkid,
            reason: None,
        }),
        Packet::PubRec(rec) => Some(ProtocolEvent::PubRec { pkid: rec.pkid }),
        Packet::Publish(publish) => Some(ProtocolEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
            qos: qos_level(publish.qos),
            retain: publish.retain,
            content_type: None,
            properties: Vec::new(),
        }),
        Packet::SubAck(ack) => {
            let outcomes: Vec<bool> = ack
                .return_codes
                .iter()
                .map(|code| matches!(code, SubscribeReasonCode::Success(_)))
                .collect();
            let (succeeded, failed) = split_by_outcome(pending.next_subscribe(), &outcomes);
            Some(ProtocolEvent::SubAck {
                succeeded,
                failed,
                reason_codes: Vec::new(),
            })
        }
        Packet::UnsubAck(_) => Some(ProtocolEvent::UnsubAck {
            topics: pending.next_unsubscribe(),
            reason_codes: Vec::new(),
        }),
        Packet::PingReq => Some(ProtocolEvent::Ping),
        Packet::PingResp => Some(ProtocolEvent::Pong),
        Packet::Disconnect => {
            warn!("Disconnected by broker");
            None
        }
        other => {
            trace!("Ignoring packet: {:?}", other);
            None
        }
    }
}

/// Translates an incoming 5.0 packet, decoding reason codes and properties.
fn translate_v5(packet: V5Packet, pending: &PendingAcks) -> Option<ProtocolEvent> {
    match packet {
        V5Packet::ConnAck(ack) => {
            let details = ack.properties.as_ref().map(|props| {
                format!(
                    "Server keep alive: {}\nMax packet size: {}",
                    props.server_keep_alive.unwrap_or(0),
                    props.max_packet_size.unwrap_or(0)
                )
            });
            Some(ProtocolEvent::ConnAck {
                accepted: ack.code == rumqttc::v5::mqttbytes::v5::ConnectReturnCode::Success,
                reason: format!("{:?}", ack.code),
                details,
            })
        }
        V5Packet::PubAck(ack) => Some(ProtocolEvent::PubAck {
            pkid: ack.pkid,
            reason: Some(format!("{:?}", ack.reason)),
        }),
        V5Packet::PubRec(rec) => Some(ProtocolEvent::PubRec { pkid: rec.pkid }),
        V5Packet::Publish(publish) => {
            let (content_type, properties) = publish
                .properties
                .map(|props| (props.content_type, props.user_properties))
                .unwrap_or_default();
            Some(ProtocolEvent::Message {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload,
                qos: qos_level_v5(publish.qos),
                retain: publish.retain,
                content_type,
                properties,
            })
        }
        V5Packet::SubAck(ack) => {
            let outcomes: Vec<bool> = ack
                .return_codes
                .iter()
                .map(|code| matches!(code, V5SubscribeReasonCode::Success(_)))
                .collect();
            let reason_codes = ack
                .return_codes
                .iter()
                .map(|code| format!("{code:?}"))
                .collect();
            let (succeeded, failed) = split_by_outcome(pending.next_subscribe(), &outcomes);
            Some(ProtocolEvent::SubAck {
                succeeded,
                failed,
                reason_codes,
            })
        }
        V5Packet::UnsubAck(ack) => Some(ProtocolEvent::UnsubAck {
            topics: pending.next_unsubscribe(),
            reason_codes: ack.reasons.iter().map(|r| format!("{r:?}")).collect(),
        }),
        V5Packet::PingReq(_) => Some(ProtocolEvent::Ping),
        V5Packet::PingResp(_) => Some(ProtocolEvent::Pong),
        V5Packet::Disconnect(disconnect) => Some(ProtocolEvent::DisconnectReason {
            code: format!("{:?}", disconnect.reason_code),
        }),
        other => {
            trace!("Ignoring packet: {:?}", other);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Retrying cannot help
    Fatal,
    // Worth another attempt
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::Tls(_) => Fatal,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,
        ConnectionError::Io(e) => classify_io_error(e),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },
        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn classify_v5_connection_error(err: &rumqttc::v5::ConnectionError) -> Disposition {
    use rumqttc::v5::ConnectionError as V5Error;
    use Disposition::*;

    match err {
        V5Error::Tls(_) => Fatal,
        V5Error::MqttState(_) => Fatal,
        V5Error::NotConnAck(_) => Fatal,
        V5Error::RequestsDone => Fatal,
        V5Error::Io(e) => classify_io_error(e),
        V5Error::ConnectionRefused(_) => Fatal,
        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

/// Local misconfiguration is fatal; everything else is assumed transient.
fn classify_io_error(err: &std::io::Error) -> Disposition {
    match err.kind() {
        std::io::ErrorKind::AddrInUse
        | std::io::ErrorKind::PermissionDenied
        | std::io::ErrorKind::InvalidInput
        | std::io::ErrorKind::InvalidData => Disposition::Fatal,
        _ => Disposition::Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

fn is_fatal_v5_error(err: &rumqttc::v5::ConnectionError) -> bool {
    matches!(classify_v5_connection_error(err), Disposition::Fatal)
}

/// Extracts the innermost error message from an error chain.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
