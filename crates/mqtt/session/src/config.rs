//! Session configuration.
//!
//! `Configuration` is the value object a caller hands to the session. It is
//! serde-friendly (TOML for the application config file, JSON for persisted
//! settings) and validated with the `validator` crate before every connect.
//!
//! Fields that only exist in MQTT 5 (user properties) are carried regardless
//! of the selected version and are simply ignored by the 3.1.1 path.
//!
//! # Examples
//!
//! ```ignore
//! let config = Configuration {
//!     host: "broker.example.com".into(),
//!     topic: "chat/room1".into(),
//!     version: ProtocolVersion::V311,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// MQTT protocol version negotiated with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1 (protocol level 4).
    #[serde(rename = "3.1.1")]
    V311,

    /// MQTT 5.0 (protocol level 5).
    #[default]
    #[serde(rename = "5.0")]
    V5,
}

impl ProtocolVersion {
    /// Protocol level byte sent in CONNECT.
    pub fn protocol_level(&self) -> u8 {
        match self {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }

    /// Whether user properties, reason codes and will delay are available.
    pub fn supports_properties(&self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }

    /// Appends the version marker used in event messages (`" (v5)"` on 5.0).
    pub fn tagged(&self, message: &str) -> String {
        match self {
            ProtocolVersion::V311 => message.to_string(),
            ProtocolVersion::V5 => format!("{message} (v5)"),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => f.write_str("3.1.1"),
            ProtocolVersion::V5 => f.write_str("5.0"),
        }
    }
}

/// MQTT delivery guarantee.
///
/// Serialized as the bare level number (`qos = 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// 0: fire and forget.
    AtMostOnce,
    /// 1: acknowledged, may be duplicated.
    #[default]
    AtLeastOnce,
    /// 2: four-way handshake, exactly one delivery.
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            QosLevel::AtMostOnce => "At Most Once (0)",
            QosLevel::AtLeastOnce => "At Least Once (1)",
            QosLevel::ExactlyOnce => "Exactly Once (2)",
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("Invalid QoS value {other}, must be 0, 1, or 2")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos.as_u8()
    }
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<QosLevel> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
        }
    }
}

/// Last Will and Testament block.
///
/// Only installed when `enabled` is set and `topic` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LastWillConfig {
    pub enabled: bool,
    pub topic: String,
    pub payload: String,
    pub qos: QosLevel,
    pub retain: bool,
}

impl LastWillConfig {
    /// Returns true when the will should be sent in CONNECT.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.topic.is_empty()
    }
}

/// Connection settings for one broker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Configuration {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port. 1883 (TCP), 8883 (TLS), 8080/8081 (WebSocket).
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// The single chat topic this session publishes to and subscribes on.
    #[validate(custom(function = "validate_topic"))]
    pub topic: String,

    /// Client identifier. Empty means "generate one at connect time".
    #[validate(length(max = 64, message = "Client ID must not exceed 64 characters"))]
    pub client_id: String,

    /// Username; credentials are only sent when this is non-empty.
    pub username: String,

    pub password: String,

    pub use_tls: bool,

    /// Tunnel MQTT over WebSocket (`ws://host:port/mqtt`).
    pub use_websocket: bool,

    /// Accept any server certificate on TLS connections.
    pub allow_self_signed_certs: bool,

    pub version: ProtocolVersion,

    pub qos: QosLevel,

    pub clean_session: bool,

    /// Keep-alive interval in seconds.
    #[validate(range(min = 1, message = "Keep alive must be at least 1 second"))]
    pub keep_alive: u16,

    pub last_will: LastWillConfig,

    /// MQTT 5 user properties, attached to CONNECT and every PUBLISH.
    pub user_properties: BTreeMap<String, String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            topic: "mqttchat/demo/room1".to_string(),
            client_id: Uuid::new_v4().to_string(),
            username: String::new(),
            password: String::new(),
            use_tls: false,
            use_websocket: false,
            allow_self_signed_certs: false,
            version: ProtocolVersion::V5,
            qos: QosLevel::AtLeastOnce,
            clean_session: true,
            keep_alive: 60,
            last_will: LastWillConfig::default(),
            user_properties: BTreeMap::new(),
        }
    }
}

impl Configuration {
    /// Client identifier to put in CONNECT, generating one if none is set.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.client_id.clone()
        }
    }

    /// Username as sent to the broker, `None` when empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    /// Sender label for outgoing chat messages.
    pub fn sender_label(&self) -> &str {
        if self.username.is_empty() {
            "Me"
        } else {
            &self.username
        }
    }

    /// User properties in wire form, empty on 3.1.1.
    pub fn effective_user_properties(&self) -> Vec<(String, String)> {
        if !self.version.supports_properties() {
            return Vec::new();
        }
        self.user_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// WebSocket endpoint, empty when the WebSocket transport is off.
    pub fn websocket_url(&self) -> String {
        if !self.use_websocket {
            return String::new();
        }
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/mqtt", self.host, self.port)
    }

    /// Conventional port for a transport combination.
    pub fn default_port(use_tls: bool, use_websocket: bool) -> u16 {
        match (use_websocket, use_tls) {
            (true, true) => 8081,
            (true, false) => 8080,
            (false, true) => 8883,
            (false, false) => 1883,
        }
    }

    /// Switches transport flags and moves the port to the matching default.
    pub fn set_transport(&mut self, use_tls: bool, use_websocket: bool) {
        self.use_tls = use_tls;
        self.use_websocket = use_websocket;
        self.port = Self::default_port(use_tls, use_websocket);
    }

    /// Adds a user property. Empty keys or values are ignored.
    pub fn add_user_property(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.user_properties.insert(key, value);
        true
    }

    pub fn remove_user_property(&mut self, key: &str) -> Option<String> {
        self.user_properties.remove(key)
    }

    pub fn regenerate_client_id(&mut self) {
        self.client_id = Uuid::new_v4().to_string();
    }

    /// Minimal check used to enable a connect button.
    pub fn can_connect(&self) -> bool {
        !self.host.is_empty() && self.port > 0 && !self.topic.is_empty()
    }
}

/// Topics must be non-empty and contain no spaces.
fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::new("empty_topic").with_message("Topic must not be empty".into()));
    }
    if topic.contains(' ') {
        return Err(ValidationError::new("invalid_topic")
            .with_message(format!("Topic must not contain spaces: {topic}").into()));
    }
    Ok(())
}
