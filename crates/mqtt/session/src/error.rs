//! Error type for the chat session.
//!
//! `SessionError` covers the failure taxonomy of the connection lifecycle:
//!
//! **Terminal at the session boundary** (converted to a state transition plus an
//! Error event, never returned from `connect`/`disconnect`/`publish`):
//! - `InitializationFailure`: the protocol client could not be constructed
//! - `ConnectFailure`: the transport refused to start or the broker rejected CONNECT
//! - `TransportDrop`: the connection went away with an underlying error
//! - `SubscriptionFailure`: the broker rejected one or more topic filters
//! - `ReconnectExhausted`: the attempt ceiling was reached
//!
//! **Plumbing** (returned where the caller can act on them):
//! - `Transport`: a request could not be queued on the client
//! - `Closed`: the session task has stopped

use thiserror::Error;

use super::backoff::BackoffError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The protocol client could not be built from the configuration.
    ///
    /// Typical causes are an invalid configuration or a TLS setup problem.
    #[error("Failed to initialize MQTT client: {0}")]
    InitializationFailure(String),

    /// The transport-level connect returned a failure or CONNACK was a refusal.
    #[error("Failed to connect to broker: {0}")]
    ConnectFailure(String),

    /// The connection dropped with an underlying transport error.
    #[error("Connection lost: {0}")]
    TransportDrop(String),

    /// The broker rejected one or more topic filters.
    #[error("Failed to subscribe to topic: {0}")]
    SubscriptionFailure(String),

    /// All reconnection attempts were used up.
    #[error("Max reconnection attempts reached: {0}")]
    ReconnectExhausted(#[from] BackoffError),

    /// A request could not be handed to the protocol client.
    #[error("Client transfer error: {0}")]
    Transport(String),

    /// The session task is gone; the handle is unusable.
    #[error("Session closed")]
    Closed,
}

/// Message for a request rejected by a full (or closed) request queue.
const QUEUE_FULL: &str = "request queue is full";

impl From<rumqttc::ClientError> for SessionError {
    fn from(err: rumqttc::ClientError) -> Self {
        match err {
            rumqttc::ClientError::TryRequest(_) => SessionError::Transport(QUEUE_FULL.into()),
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl From<rumqttc::v5::ClientError> for SessionError {
    fn from(err: rumqttc::v5::ClientError) -> Self {
        match err {
            rumqttc::v5::ClientError::TryRequest(_) => SessionError::Transport(QUEUE_FULL.into()),
            other => SessionError::Transport(other.to_string()),
        }
    }
}
