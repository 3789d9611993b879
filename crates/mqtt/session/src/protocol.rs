//! Boundary between the session and an MQTT client library.
//!
//! A [`Connector`] builds a version-specific [`ProtocolClient`] and wires its
//! asynchronous acknowledgements into an [`EventSink`]. Requests on the client
//! never wait for acknowledgement; completion arrives later as a
//! [`ProtocolEvent`].
//!
//! ```text
//! Session actor ──publish/subscribe──▶ ProtocolClient ──▶ broker
//!       ▲                                                   │
//!       └──────── (generation, ProtocolEvent) ◀── driver ◀──┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{
    config::{Configuration, ProtocolVersion, QosLevel},
    error::SessionError,
};

/// A single outbound chat publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,

    /// Sent only on MQTT 5.
    pub user_properties: Vec<(String, String)>,
}

/// Callback surface of the protocol client, one variant per broker signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// CONNACK. `details` carries v5 server properties when present.
    ConnAck {
        accepted: bool,
        reason: String,
        details: Option<String>,
    },

    /// PUBACK for a QoS 1 publish. `reason` is only decoded on v5.
    PubAck { pkid: u16, reason: Option<String> },

    /// PUBREC, the first step of the QoS 2 handshake.
    PubRec { pkid: u16 },

    /// v5 outgoing PUBLISH written to the socket. `pkid` is 0 for QoS 0.
    Published { pkid: u16 },

    /// Inbound PUBLISH. `content_type` and `properties` are v5 only.
    Message {
        topic: String,
        payload: Bytes,
        qos: u8,
        retain: bool,
        content_type: Option<String>,
        properties: Vec<(String, String)>,
    },

    /// SUBACK split into accepted and rejected topic filters.
    SubAck {
        succeeded: Vec<String>,
        failed: Vec<String>,
        reason_codes: Vec<String>,
    },

    UnsubAck {
        topics: Vec<String>,
        reason_codes: Vec<String>,
    },

    Ping,
    Pong,

    /// The transport could not establish a session and retrying cannot help
    /// (TLS failure, protocol violation before CONNACK).
    ConnectFailed { error: String },

    /// The connection is gone. `error` is `None` for a clean close.
    Disconnected { error: Option<String> },

    /// v5 DISCONNECT sent by the broker.
    DisconnectReason { code: String },

    /// v5 AUTH.
    AuthReason { code: String },
}

/// A [`ProtocolEvent`] stamped with the connection attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ProtocolEvent,
}

/// Marshals callbacks from the transport onto the session actor.
///
/// The channel is unbounded so a driver never blocks on a busy actor.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forwards an event. Returns `false` once the session has stopped.
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live protocol session for one version.
///
/// Every method fires a request and returns; dropping the client tears the
/// connection down.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    async fn publish(&self, request: PublishRequest) -> Result<(), SessionError>;

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SessionError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError>;

    async fn disconnect(&self) -> Result<(), SessionError>;
}

/// Builds protocol clients from a configuration snapshot.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Starts a connection attempt.
    ///
    /// Returns once the client exists and the handshake is in flight; CONNACK is
    /// reported through `sink`.
    ///
    /// # Errors
    /// - `SessionError::InitializationFailure`: the client could not be built
    /// - `SessionError::ConnectFailure`: the transport refused to start
    async fn connect(
        &self,
        config: &Configuration,
        sink: EventSink,
    ) -> Result<Box<dyn ProtocolClient>, SessionError>;
}
