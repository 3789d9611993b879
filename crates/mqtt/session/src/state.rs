//! Connection state of the chat session.
//!
//! The session actor is the only writer; everything else observes the value
//! through the watch channel returned by `Session::subscribe_state`.
//!
//! # Examples
//!
//! ```ignore
//! use mqttchat_session::ConnectionState;
//!
//! let state = ConnectionState::Reconnecting;
//! println!("Status: {}", state); // "Reconnecting..."
//! assert!(state.is_connecting());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single broker connection.
///
/// The transitions are:
/// - `Disconnected` -> `Connecting` (user connect)
/// - `Connecting` -> `Connected` (broker accepted CONNECT)
/// - `Connecting` -> `Error` (broker rejected, or the transport could not be started)
/// - `Connected` -> `Disconnecting` -> `Disconnected` (user disconnect)
/// - `Connected` -> `Disconnected` (transport dropped, with or without an error)
/// - `Disconnected` -> `Reconnecting` -> `Connecting` (backoff elapsed)
/// - `Reconnecting` -> `Error` (attempts exhausted)
///
/// `Error` is only left through an explicit connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session with the broker. Initial state.
    #[default]
    Disconnected,

    /// CONNECT has been sent, waiting for CONNACK.
    Connecting,

    /// CONNACK accepted. Publishing and subscribing are possible.
    Connected,

    /// A user-requested DISCONNECT is being sent.
    Disconnecting,

    /// Waiting for the backoff delay before the next attempt.
    Reconnecting,

    /// The last attempt failed permanently (rejected, unbuildable or exhausted).
    Error,
}

impl ConnectionState {
    /// Short identifier used in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Error => "Error",
        }
    }

    /// Human readable label, as shown in a status bar.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting...",
            ConnectionState::Reconnecting => "Reconnecting...",
            ConnectionState::Error => "Error",
        }
    }

    /// Returns true only in `Connected`, the one state where publishes are sent.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns true while an attempt is in flight or scheduled.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
