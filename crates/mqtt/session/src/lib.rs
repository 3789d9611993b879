//! # mqttchat-session: chat session over MQTT 3.1.1 and 5.0
//!
//! Connection lifecycle for a single-topic chat client built on `rumqttc`:
//!
//! - **One broker connection** per session, over TCP, TLS, WS or WSS
//! - **Automatic reconnection** with exponential backoff after a transport drop
//! - **Reachability aware**: waits are paused while the network is down
//! - **Observable state** through a `watch` channel and a `broadcast` of updates
//! - **Bounded event log** (newest first) and an ordered message history
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mqttchat_session::{Configuration, RumqttcConnector, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration {
//!         host: "broker.example.com".into(),
//!         topic: "chat/lobby".into(),
//!         ..Default::default()
//!     };
//!
//!     let session = Session::spawn(config, Arc::new(RumqttcConnector::new()));
//!     let mut state = session.subscribe_state();
//!
//!     session.connect().await?;
//!     while !state.borrow_and_update().is_connected() {
//!         state.changed().await?;
//!     }
//!
//!     session.publish("hello", false).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Reconnection
//!
//! A drop with an error schedules attempt `n` after `min(2^n, 60)` seconds.
//! After 10 attempts the session stops in `Error` until the user connects
//! again. A clean close, a user disconnect and a rejected CONNACK never
//! reconnect.

mod backoff;
mod client;
mod config;
mod connection;
mod error;
mod event;
mod manager;
mod message;
mod protocol;
mod reachability;
mod reconnect;
mod state;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, BackoffError};
pub use client::{BuiltClient, ClientBuilder};
pub use config::{Configuration, LastWillConfig, ProtocolVersion, QosLevel};
pub use connection::RumqttcConnector;
pub use error::SessionError;
pub use event::{Event, EventCategory, EventLog, EVENT_LOG_CAPACITY};
pub use manager::{Session, SessionBuilder, SessionUpdate};
pub use message::{Message, MessageStore, REMOTE_SENDER};
pub use protocol::{
    Connector, EventSink, ProtocolClient, ProtocolEvent, PublishRequest, TaggedEvent,
};
pub use reachability::{always_online, Reachability, TransportKind};
pub use state::ConnectionState;
