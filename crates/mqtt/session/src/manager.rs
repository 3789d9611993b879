//! Connection lifecycle manager.
//!
//! A single actor task owns every piece of mutable session state: the
//! [`ConnectionState`], the active protocol client, the reconnection
//! controller, the [`EventLog`] and the [`MessageStore`]. Everything that can
//! change that state arrives on a channel and is handled one item at a time:
//!
//! ```text
//! Session (handle) ──commands──────────┐
//! protocol driver ──(generation, ev)───┤
//! backoff task ──elapsed id────────────┼──▶ SessionActor ──▶ watch<ConnectionState>
//! reachability ──watch<Reachability>───┘                └──▶ broadcast<SessionUpdate>
//! ```
//!
//! Protocol events are preferred over user commands, so a callback that was
//! delivered before a command is always applied first.
//!
//! None of the lifecycle failures surface as errors: they become a state
//! transition plus an Error event. Handle methods fail only with
//! [`SessionError::Closed`].
//!
//! # Typical Usage
//!
//! ```ignore
//! let session = Session::builder(Arc::new(RumqttcConnector::new()))
//!     .configuration(config)
//!     .reachability(monitor.subscribe())
//!     .spawn();
//!
//! let mut updates = session.subscribe_updates();
//! session.connect().await?;
//! session.publish("hello", false).await?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::{
    backoff::Backoff,
    config::{Configuration, ProtocolVersion},
    error::SessionError,
    event::{Event, EventCategory, EventLog},
    message::{Message, MessageStore},
    protocol::{Connector, EventSink, ProtocolClient, ProtocolEvent, PublishRequest, TaggedEvent},
    reachability::Reachability,
    reconnect::{ReconnectController, ReconnectOutcome},
    state::ConnectionState,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Change notification published on every transition and append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    StateChanged(ConnectionState),
    EventLogged(Event),
    MessageAppended(Message),
    MessagesCleared,
    EventsCleared,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect(Reply<()>),
    Disconnect(Reply<()>),
    Publish {
        content: String,
        retain: bool,
        reply: Reply<()>,
    },
    Subscribe(Reply<()>),
    Unsubscribe(Reply<()>),
    ClearMessages(Reply<()>),
    ClearEvents(Reply<()>),
    SetConfiguration(Box<Configuration>, Reply<()>),
    Configuration(Reply<Configuration>),
    Messages(Reply<Vec<Message>>),
    Events(Reply<Vec<Event>>),
    Attempts(Reply<u32>),
    Shutdown(Reply<()>),
}

/// Configures and starts a [`Session`].
pub struct SessionBuilder {
    config: Configuration,
    connector: Arc<dyn Connector>,
    reachability: Option<watch::Receiver<Reachability>>,
    backoff: Backoff,
    update_capacity: usize,
}

impl SessionBuilder {
    pub fn configuration(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    /// Connectivity signal used to pause and resume reconnection.
    pub fn reachability(mut self, rx: watch::Receiver<Reachability>) -> Self {
        self.reachability = Some(rx);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Buffer of the update broadcast; slow observers lag past this.
    pub fn update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity.max(1);
        self
    }

    /// Spawns the actor on the current tokio runtime.
    pub fn spawn(self) -> Session {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (protocol_tx, protocol_rx) = mpsc::unbounded_channel();
        let (elapsed_tx, elapsed_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (updates_tx, _) = broadcast::channel(self.update_capacity);

        let online = self
            .reachability
            .as_ref()
            .map(|rx| rx.borrow().online)
            .unwrap_or(true);

        let actor = SessionActor {
            config: self.config,
            active: None,
            connector: self.connector,
            client: None,
            generation: 0,
            state_tx,
            updates_tx: updates_tx.clone(),
            events: EventLog::default(),
            messages: MessageStore::new(),
            reconnect: ReconnectController::new(self.backoff, elapsed_tx),
            protocol_tx,
            online,
        };
        tokio::spawn(actor.run(command_rx, protocol_rx, elapsed_rx, self.reachability));

        Session {
            commands: command_tx,
            state_rx,
            updates_tx,
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    updates_tx: broadcast::Sender<SessionUpdate>,
}

impl Session {
    pub fn builder(connector: Arc<dyn Connector>) -> SessionBuilder {
        SessionBuilder {
            config: Configuration::default(),
            connector,
            reachability: None,
            backoff: Backoff::default(),
            update_capacity: UPDATE_CHANNEL_CAPACITY,
        }
    }

    /// Starts a session with default reconnection settings and no reachability signal.
    pub fn spawn(config: Configuration, connector: Arc<dyn Connector>) -> Self {
        Self::builder(connector).configuration(config).spawn()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Starts a connection attempt with a snapshot of the current configuration.
    ///
    /// Returns once the attempt is in flight; observe the state for the outcome.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(Command::Connect).await
    }

    /// Cancels reconnection, resets the attempt counter and closes the connection.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Command::Disconnect).await
    }

    /// Publishes a chat message on the configured topic.
    ///
    /// When not connected this only logs an Error event.
    pub async fn publish(&self, content: impl Into<String>, retain: bool) -> Result<(), SessionError> {
        let content = content.into();
        self.request(|reply| Command::Publish {
            content,
            retain,
            reply,
        })
        .await
    }

    /// Subscribes the configured topic. No-op unless connected.
    pub async fn subscribe(&self) -> Result<(), SessionError> {
        self.request(Command::Subscribe).await
    }

    /// Unsubscribes the configured topic. No-op unless connected.
    pub async fn unsubscribe(&self) -> Result<(), SessionError> {
        self.request(Command::Unsubscribe).await
    }

    pub async fn clear_messages(&self) -> Result<(), SessionError> {
        self.request(Command::ClearMessages).await
    }

    pub async fn clear_events(&self) -> Result<(), SessionError> {
        self.request(Command::ClearEvents).await
    }

    /// Replaces the configuration used by the next `connect`.
    pub async fn set_configuration(&self, config: Configuration) -> Result<(), SessionError> {
        self.request(|reply| Command::SetConfiguration(Box::new(config), reply))
            .await
    }

    pub async fn configuration(&self) -> Result<Configuration, SessionError> {
        self.request(Command::Configuration).await
    }

    /// Message history in send/arrival order.
    pub async fn messages(&self) -> Result<Vec<Message>, SessionError> {
        self.request(Command::Messages).await
    }

    /// Event log, newest first.
    pub async fn events(&self) -> Result<Vec<Event>, SessionError> {
        self.request(Command::Events).await
    }

    /// Reconnection attempts in the current sequence.
    pub async fn attempts(&self) -> Result<u32, SessionError> {
        self.request(Command::Attempts).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates_tx.subscribe()
    }

    /// Disconnects and stops the actor. Later calls fail with `Closed`.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(Command::Shutdown).await
    }
}

struct SessionActor {
    /// Caller-owned configuration, used by the next connect.
    config: Configuration,

    /// Snapshot taken by the connect that produced `client`.
    active: Option<Configuration>,

    connector: Arc<dyn Connector>,
    client: Option<Box<dyn ProtocolClient>>,

    /// Connection attempt counter; events from other generations are stale.
    generation: u64,

    state_tx: watch::Sender<ConnectionState>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    events: EventLog,
    messages: MessageStore,
    reconnect: ReconnectController,
    protocol_tx: mpsc::UnboundedSender<TaggedEvent>,
    online: bool,
}

async fn reachability_changed(
    rx: &mut Option<watch::Receiver<Reachability>>,
) -> Option<Reachability> {
    match rx {
        Some(inner) => match inner.changed().await {
            Ok(()) => Some(*inner.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut protocol_rx: mpsc::UnboundedReceiver<TaggedEvent>,
        mut elapsed_rx: mpsc::UnboundedReceiver<u64>,
        mut reachability: Option<watch::Receiver<Reachability>>,
    ) {
        debug!("Session actor started");
        loop {
            tokio::select! {
                biased;

                Some(tagged) = protocol_rx.recv() => self.handle_protocol(tagged).await,

                Some(id) = elapsed_rx.recv() => self.handle_backoff_elapsed(id).await,

                changed = reachability_changed(&mut reachability) => match changed {
                    Some(update) => self.handle_reachability(update).await,
                    None => {
                        debug!("Reachability monitor stopped");
                        reachability = None;
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.reconnect.reset();
        self.release_client();
        debug!("Session actor stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                self.connect().await;
                let _ = reply.send(());
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Publish {
                content,
                retain,
                reply,
            } => {
                self.publish(content, retain).await;
                let _ = reply.send(());
            }
            Command::Subscribe(reply) => {
                self.subscribe().await;
                let _ = reply.send(());
            }
            Command::Unsubscribe(reply) => {
                self.unsubscribe().await;
                let _ = reply.send(());
            }
            Command::ClearMessages(reply) => {
                self.messages.clear();
                self.notify(SessionUpdate::MessagesCleared);
                let _ = reply.send(());
            }
            Command::ClearEvents(reply) => {
                self.events.clear();
                self.notify(SessionUpdate::EventsCleared);
                let _ = reply.send(());
            }
            Command::SetConfiguration(config, reply) => {
                self.config = *config;
                debug!("Configuration replaced");
                let _ = reply.send(());
            }
            Command::Configuration(reply) => {
                let _ = reply.send(self.config.clone());
            }
            Command::Messages(reply) => {
                let _ = reply.send(self.messages.snapshot());
            }
            Command::Events(reply) => {
                let _ = reply.send(self.events.snapshot());
            }
            Command::Attempts(reply) => {
                let _ = reply.send(self.reconnect.attempts());
            }
            Command::Shutdown(reply) => {
                if self.client.is_some() || self.reconnect.is_active() {
                    self.disconnect().await;
                }
                info!("Session shut down");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Connection state changed: {previous:?} -> {state:?}");
            self.notify(SessionUpdate::StateChanged(state));
        }
    }

    fn notify(&self, update: SessionUpdate) {
        // no observers is fine
        let _ = self.updates_tx.send(update);
    }

    /// Appends to the event log and mirrors the event to tracing.
    fn record(&mut self, category: EventCategory, message: impl Into<String>, details: Option<String>) {
        let event = Event::new(category, message, details);
        match category {
            EventCategory::Error => warn!("{event}"),
            EventCategory::Connection | EventCategory::Subscription => info!("{event}"),
            EventCategory::Publish | EventCategory::Receive | EventCategory::Debug => {
                debug!("{event}")
            }
        }
        self.events.push(event.clone());
        self.notify(SessionUpdate::EventLogged(event));
    }

    fn append_message(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.notify(SessionUpdate::MessageAppended(message));
    }

    /// Version of the live connection, falling back to the configured one.
    fn version(&self) -> ProtocolVersion {
        self.active
            .as_ref()
            .map(|c| c.version)
            .unwrap_or(self.config.version)
    }

    /// Drops the protocol client, which stops its driver.
    fn release_client(&mut self) {
        if self.client.take().is_some() {
            trace!("Released protocol client for generation {}", self.generation);
        }
        self.active = None;
    }

    async fn connect(&mut self) {
        let state = self.state();
        if state.is_connected() || state == ConnectionState::Connecting {
            self.record(
                EventCategory::Debug,
                "Connect ignored",
                Some(format!("State: {}", state.as_str())),
            );
            return;
        }

        // a user connect supersedes a pending backoff wait
        self.reconnect.cancel();
        self.release_client();

        let snapshot = self.config.clone();
        self.set_state(ConnectionState::Connecting);
        self.record(
            EventCategory::Connection,
            format!("Initiating connection to {}:{}", snapshot.host, snapshot.port),
            None,
        );

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.protocol_tx.clone());
        match self.connector.connect(&snapshot, sink).await {
            Ok(client) => {
                debug!(
                    "MQTT {} handshake in flight, generation {}",
                    client.version(),
                    self.generation
                );
                self.client = Some(client);
                self.active = Some(snapshot);
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                self.record(EventCategory::Error, "Connection failed", Some(e.to_string()));
            }
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect.reset();

        if let Some(client) = self.client.take() {
            if self.state().is_connected() {
                self.set_state(ConnectionState::Disconnecting);
            }
            if let Err(e) = client.disconnect().await {
                warn!("Error sending disconnect packet: {e}");
            }
        }
        self.release_client();

        self.set_state(ConnectionState::Disconnected);
        self.record(EventCategory::Connection, "Disconnected from broker", None);
    }

    async fn publish(&mut self, content: String, retain: bool) {
        let ready = self.state().is_connected() && self.client.is_some();
        let Some(config) = self.active.clone().filter(|_| ready) else {
            self.record(EventCategory::Error, "Cannot publish: Not connected", None);
            return;
        };

        let qos = config.qos;
        let message = Message::outgoing(
            content.clone(),
            config.topic.clone(),
            config.sender_label(),
            qos.as_u8(),
            retain,
        );
        self.append_message(message);

        let request = PublishRequest {
            topic: config.topic.clone(),
            payload: Bytes::from(content),
            qos,
            retain,
            user_properties: config.effective_user_properties(),
        };

        let result = match &self.client {
            Some(client) => client.publish(request).await,
            None => Err(SessionError::Closed),
        };
        match result {
            Ok(()) => self.record(
                EventCategory::Publish,
                format!("Published to {}", config.topic),
                Some(format!("QoS: {}, Retained: {}", qos.as_u8(), retain)),
            ),
            Err(e) => self.record(EventCategory::Error, "Publish failed", Some(e.to_string())),
        }
    }

    async fn subscribe(&mut self) {
        if !self.state().is_connected() {
            return;
        }
        let (Some(client), Some(config)) = (&self.client, &self.active) else {
            return;
        };
        let topic = config.topic.clone();

        match client.subscribe(&topic, config.qos).await {
            Ok(()) => self.record(
                EventCategory::Subscription,
                format!("Subscribed to {topic}"),
                None,
            ),
            Err(e) => {
                let error = SessionError::SubscriptionFailure(e.to_string());
                self.record(EventCategory::Error, "Subscription failed", Some(error.to_string()))
            }
        }
    }

    async fn unsubscribe(&mut self) {
        if !self.state().is_connected() {
            return;
        }
        let (Some(client), Some(config)) = (&self.client, &self.active) else {
            return;
        };
        let topic = config.topic.clone();

        match client.unsubscribe(&topic).await {
            Ok(()) => self.record(
                EventCategory::Subscription,
                format!("Unsubscribed from {topic}"),
                None,
            ),
            Err(e) => self.record(EventCategory::Error, "Unsubscribe failed", Some(e.to_string())),
        }
    }

    /// Asks the controller for the next reconnection step.
    fn start_reconnection(&mut self) {
        match self.reconnect.start() {
            ReconnectOutcome::Scheduled { attempt, delay } => {
                self.set_state(ConnectionState::Reconnecting);
                self.record(
                    EventCategory::Debug,
                    format!("Reconnecting in {}s", delay.as_secs()),
                    Some(format!("Attempt {attempt} of {}", self.reconnect.max_attempts())),
                );
            }
            ReconnectOutcome::AlreadyActive => {}
            ReconnectOutcome::Exhausted(e) => {
                self.set_state(ConnectionState::Error);
                let error = SessionError::from(e);
                self.record(
                    EventCategory::Error,
                    "Max reconnection attempts reached",
                    Some(error.to_string()),
                );
            }
        }
    }

    async fn handle_backoff_elapsed(&mut self, id: u64) {
        if !self.reconnect.take_elapsed(id) {
            return;
        }
        debug!("Backoff elapsed, reconnecting");
        self.connect().await;
    }

    async fn handle_reachability(&mut self, update: Reachability) {
        if update.online == self.online {
            return;
        }
        self.online = update.online;

        if !update.online {
            info!("Network unavailable");
            if self.reconnect.cancel() {
                self.set_state(ConnectionState::Disconnected);
                self.record(
                    EventCategory::Connection,
                    "Network unavailable, reconnection paused",
                    Some(format!("Attempts so far: {}", self.reconnect.attempts())),
                );
            }
            return;
        }

        info!("Network available via {}", update.transport);
        let attempts = self.reconnect.attempts();
        if self.state() != ConnectionState::Disconnected || attempts == 0 {
            return;
        }

        match self.reconnect.attempt_now() {
            Ok(attempt) => {
                self.set_state(ConnectionState::Reconnecting);
                self.record(
                    EventCategory::Connection,
                    "Network restored, reconnecting",
                    Some(format!("Attempt {attempt} of {}", self.reconnect.max_attempts())),
                );
                self.connect().await;
            }
            Err(e) => {
                self.set_state(ConnectionState::Error);
                self.record(
                    EventCategory::Error,
                    "Max reconnection attempts reached",
                    Some(SessionError::from(e).to_string()),
                );
            }
        }
    }

    async fn handle_protocol(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation || self.client.is_none() {
            trace!(
                "Dropping event from stale generation {}: {:?}",
                tagged.generation,
                tagged.event
            );
            return;
        }

        let version = self.version();
        match tagged.event {
            ProtocolEvent::ConnAck {
                accepted: true,
                reason,
                details,
            } => {
                self.reconnect.on_connected();
                self.set_state(ConnectionState::Connected);
                match version {
                    ProtocolVersion::V5 => {
                        let mut text = format!("Reason: {reason}");
                        if let Some(details) = details {
                            text.push('\n');
                            text.push_str(&details);
                        }
                        self.record(
                            EventCategory::Connection,
                            "Connected successfully (MQTT v5)",
                            Some(text),
                        );
                    }
                    ProtocolVersion::V311 => {
                        self.record(EventCategory::Connection, "Connected successfully", None)
                    }
                }
                self.subscribe().await;
            }
            ProtocolEvent::ConnAck {
                accepted: false,
                reason,
                ..
            } => {
                self.release_client();
                self.set_state(ConnectionState::Error);
                let details = match version {
                    ProtocolVersion::V5 => format!("Reason: {reason}"),
                    ProtocolVersion::V311 => format!("ACK: {reason}"),
                };
                debug!("{}", SessionError::ConnectFailure(reason));
                self.record(EventCategory::Error, "Connection rejected", Some(details));
            }
            ProtocolEvent::ConnectFailed { error } => {
                self.release_client();
                self.set_state(ConnectionState::Error);
                let error = SessionError::ConnectFailure(error);
                self.record(EventCategory::Error, "Connection failed", Some(error.to_string()));
            }
            ProtocolEvent::PubAck { pkid, reason } => {
                let mut details = format!("ID: {pkid}");
                if let Some(reason) = reason {
                    details.push_str(&format!("\nReason: {reason}"));
                }
                self.record(
                    EventCategory::Publish,
                    version.tagged("Publish acknowledged"),
                    Some(details),
                );
            }
            ProtocolEvent::PubRec { pkid } => {
                self.record(
                    EventCategory::Publish,
                    "Publish received (QoS 2)",
                    Some(format!("ID: {pkid}")),
                );
            }
            ProtocolEvent::Published { pkid } => {
                self.record(
                    EventCategory::Publish,
                    "Message published (v5)",
                    Some(format!("ID: {pkid}")),
                );
            }
            ProtocolEvent::Message {
                topic,
                payload,
                content_type,
                properties,
                ..
            } => self.handle_message(topic, payload, content_type, properties),
            ProtocolEvent::SubAck {
                succeeded,
                failed,
                reason_codes,
            } => {
                if !succeeded.is_empty() {
                    let mut details = format!("Topics: {succeeded:?}");
                    if !reason_codes.is_empty() {
                        details.push_str(&format!("\nReason codes: {reason_codes:?}"));
                    }
                    self.record(
                        EventCategory::Subscription,
                        version.tagged("Subscribed successfully"),
                        Some(details),
                    );
                }
                if !failed.is_empty() {
                    debug!("{}", SessionError::SubscriptionFailure(failed.join(", ")));
                    self.record(
                        EventCategory::Error,
                        "Subscription failed",
                        Some(format!("Topics: {failed:?}")),
                    );
                }
            }
            ProtocolEvent::UnsubAck {
                topics,
                reason_codes,
            } => {
                let mut details = format!("Topics: {topics:?}");
                if !reason_codes.is_empty() {
                    details.push_str(&format!("\nReason codes: {reason_codes:?}"));
                }
                self.record(
                    EventCategory::Subscription,
                    version.tagged("Unsubscribed"),
                    Some(details),
                );
            }
            // heartbeats are not logged
            ProtocolEvent::Ping => trace!("Ping"),
            ProtocolEvent::Pong => trace!("Pong"),
            ProtocolEvent::Disconnected { error } => {
                self.release_client();
                self.set_state(ConnectionState::Disconnected);
                match error {
                    Some(error) => {
                        let error = SessionError::TransportDrop(error);
                        self.record(
                            EventCategory::Error,
                            "Disconnected with error",
                            Some(error.to_string()),
                        );
                        self.start_reconnection();
                    }
                    None => self.record(EventCategory::Connection, "Disconnected", None),
                }
            }
            ProtocolEvent::DisconnectReason { code } => {
                self.record(
                    EventCategory::Connection,
                    "Disconnect reason (v5)",
                    Some(format!("Code: {code}")),
                );
            }
            ProtocolEvent::AuthReason { code } => {
                self.record(
                    EventCategory::Connection,
                    "Auth reason (v5)",
                    Some(format!("Code: {code}")),
                );
            }
        }
    }

    /// Records an inbound chat message.
    ///
    /// The message carries the locally configured QoS, not the one the broker reported.
    fn handle_message(
        &mut self,
        topic: String,
        payload: Bytes,
        content_type: Option<String>,
        properties: Vec<(String, String)>,
    ) {
        let content = match String::from_utf8(payload.to_vec()) {
            Ok(content) => content,
            Err(_) => {
                warn!("Dropping non-UTF-8 payload received on {topic}");
                return;
            }
        };

        let qos = self
            .active
            .as_ref()
            .map(|c| c.qos)
            .unwrap_or(self.config.qos)
            .as_u8();

        self.append_message(Message::incoming(content.clone(), topic.clone(), qos));
        self.record(
            EventCategory::Receive,
            format!("Received from {topic}"),
            Some(content),
        );

        if content_type.is_some() || !properties.is_empty() {
            let content_type = content_type.as_deref().unwrap_or("none");
            self.record(
                EventCategory::Receive,
                "Message properties (v5)",
                Some(format!(
                    "Topic: {topic}\nContent Type: {content_type}\nUser Properties: {properties:?}"
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::QosLevel,
        testing::{Call, MockConnector},
    };

    fn chat_config() -> Configuration {
        Configuration {
            host: "test.broker".into(),
            topic: "room1".into(),
            qos: QosLevel::AtLeastOnce,
            version: ProtocolVersion::V5,
            ..Default::default()
        }
    }

    fn start(config: Configuration) -> (Session, MockConnector) {
        let connector = MockConnector::new();
        let session = Session::spawn(config, Arc::new(connector.clone()));
        (session, connector)
    }

    /// Connects and accepts the handshake.
    async fn connected(config: Configuration) -> (Session, MockConnector) {
        let (session, connector) = start(config);
        session.connect().await.unwrap();
        connector.accept();
        // protocol events are handled before the next command
        session.attempts().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        (session, connector)
    }

    fn count(events: &[Event], category: EventCategory) -> usize {
        events.iter().filter(|e| e.category == category).count()
    }

    fn states(rx: &mut broadcast::Receiver<SessionUpdate>) -> Vec<ConnectionState> {
        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let SessionUpdate::StateChanged(state) = update {
                seen.push(state);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (session, _) = start(chat_config());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.attempts().await.unwrap(), 0);
        assert!(session.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_while_disconnected() {
        let (session, connector) = start(chat_config());
        session.publish("hello", false).await.unwrap();

        let events = session.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Cannot publish: Not connected");
        assert!(session.messages().await.unwrap().is_empty());
        assert_eq!(connector.connect_count(), 0);
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_then_connack_subscribes() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);

        let config = connector.last_config().unwrap();
        assert_eq!(config.host, "test.broker");
        assert_eq!(config.version, ProtocolVersion::V5);

        session.clear_events().await.unwrap();
        connector.accept();
        session.attempts().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        let events = session.events().await.unwrap();
        assert_eq!(count(&events, EventCategory::Connection), 1);
        assert!(events
            .iter()
            .any(|e| e.message == "Connected successfully (MQTT v5)"));
        assert!(events.iter().any(|e| e.message == "Subscribed to room1"));
        assert_eq!(
            connector.calls(),
            vec![Call::Subscribe("room1".into(), QosLevel::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_connecting() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_v311_connack_event() {
        let config = Configuration {
            version: ProtocolVersion::V311,
            ..chat_config()
        };
        let (session, _connector) = connected(config).await;
        let events = session.events().await.unwrap();
        assert!(events.iter().any(|e| e.message == "Connected successfully"
            && e.details.is_none()));
    }

    #[tokio::test]
    async fn test_connector_failure_goes_to_error() {
        let (session, connector) = start(chat_config());
        connector.fail_next_connect(SessionError::InitializationFailure("bad TLS".into()));
        session.connect().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Error);
        let events = session.events().await.unwrap();
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Connection failed");
        assert!(events[0].details.as_deref().unwrap().contains("bad TLS"));
    }

    #[tokio::test]
    async fn test_rejected_connack_goes_to_error() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        connector.emit(ProtocolEvent::ConnAck {
            accepted: false,
            reason: "NotAuthorized".into(),
            details: None,
        });
        session.attempts().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Error);
        let events = session.events().await.unwrap();
        assert_eq!(events[0].message, "Connection rejected");
        assert_eq!(events[0].details.as_deref(), Some("Reason: NotAuthorized"));

        // an explicit connect leaves Error
        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_transport_failure_does_not_reconnect() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        connector.emit(ProtocolEvent::ConnectFailed {
            error: "invalid certificate".into(),
        });
        session.attempts().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Error);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_with_error_starts_reconnection() {
        let (session, connector) = connected(chat_config()).await;
        session.clear_events().await.unwrap();
        let mut updates = session.subscribe_updates();

        connector.drop_with_error("connection reset");
        assert_eq!(session.attempts().await.unwrap(), 1);

        assert_eq!(
            states(&mut updates),
            vec![ConnectionState::Disconnected, ConnectionState::Reconnecting]
        );
        let events = session.events().await.unwrap();
        assert_eq!(count(&events, EventCategory::Error), 1);
        let error = events
            .iter()
            .find(|e| e.category == EventCategory::Error)
            .unwrap();
        assert_eq!(error.message, "Disconnected with error");

        // the wait for attempt 1 is 2 seconds
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(connector.connect_count(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.attempts().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_disconnect_does_not_reconnect() {
        let (session, connector) = connected(chat_config()).await;
        connector.emit(ProtocolEvent::Disconnected { error: None });
        session.attempts().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.events().await.unwrap()[0].message, "Disconnected");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(session.attempts().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnection_stops_after_ten_attempts() {
        let (session, connector) = connected(chat_config()).await;
        connector.drop_with_error("connection reset");
        session.attempts().await.unwrap();

        for attempt in 1..=10 {
            tokio::time::sleep(Duration::from_secs(61)).await;
            session.attempts().await.unwrap();
            assert_eq!(connector.connect_count(), 1 + attempt);
            assert_eq!(session.state(), ConnectionState::Connecting);

            connector.drop_with_error("connection refused");
            session.attempts().await.unwrap();
        }

        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(session.attempts().await.unwrap(), 10);
        let events = session.events().await.unwrap();
        assert_eq!(events[0].message, "Max reconnection attempts reached");

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.connect_count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connack_resets_attempts() {
        let (session, connector) = connected(chat_config()).await;
        connector.drop_with_error("connection reset");
        session.attempts().await.unwrap();

        for _ in 0..2 {
            tokio::time::sleep(Duration::from_secs(61)).await;
            connector.drop_with_error("connection reset");
            session.attempts().await.unwrap();
        }
        assert_eq!(session.attempts().await.unwrap(), 3);

        tokio::time::sleep(Duration::from_secs(61)).await;
        connector.accept();
        assert_eq!(session.attempts().await.unwrap(), 0);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnection() {
        let (session, connector) = connected(chat_config()).await;
        connector.drop_with_error("connection reset");
        session.attempts().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Reconnecting);

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.attempts().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        session.attempts().await.unwrap();
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_user_disconnect_from_connected() {
        let (session, connector) = connected(chat_config()).await;
        let mut updates = session.subscribe_updates();

        session.disconnect().await.unwrap();
        assert_eq!(
            states(&mut updates),
            vec![ConnectionState::Disconnecting, ConnectionState::Disconnected]
        );
        assert!(connector.calls().contains(&Call::Disconnect));
        assert_eq!(
            session.events().await.unwrap()[0].message,
            "Disconnected from broker"
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_already_disconnected() {
        let (session, connector) = start(chat_config());
        session.disconnect().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        let events = session.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::Connection);
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_while_connected() {
        let mut config = chat_config();
        config.username = "alice".into();
        config.add_user_property("room", "lobby");
        let (session, connector) = connected(config).await;

        session.publish("hi all", true).await.unwrap();

        let messages = session.messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_outgoing);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].qos, 1);
        assert!(messages[0].is_retained);

        let publish = connector
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Publish(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(publish.topic, "room1");
        assert_eq!(publish.payload, Bytes::from("hi all"));
        assert!(publish.retain);
        assert_eq!(
            publish.user_properties,
            vec![("room".to_string(), "lobby".to_string())]
        );

        let event = &session.events().await.unwrap()[0];
        assert_eq!(event.category, EventCategory::Publish);
        assert_eq!(event.message, "Published to room1");
        assert_eq!(event.details.as_deref(), Some("QoS: 1, Retained: true"));
    }

    #[tokio::test]
    async fn test_v311_publish_has_no_user_properties() {
        let mut config = Configuration {
            version: ProtocolVersion::V311,
            ..chat_config()
        };
        config.add_user_property("room", "lobby");
        let (session, connector) = connected(config).await;
        session.publish("hi", false).await.unwrap();

        let has_properties = connector.calls().iter().any(|call| {
            matches!(call, Call::Publish(request) if !request.user_properties.is_empty())
        });
        assert!(!has_properties);
    }

    #[tokio::test]
    async fn test_active_connection_uses_its_snapshot() {
        let (session, connector) = connected(chat_config()).await;
        session
            .set_configuration(Configuration {
                topic: "room2".into(),
                ..chat_config()
            })
            .await
            .unwrap();

        session.publish("still room1", false).await.unwrap();
        let topics: Vec<String> = connector
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish(request) => Some(request.topic),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["room1".to_string()]);
        assert_eq!(session.configuration().await.unwrap().topic, "room2");
    }

    #[tokio::test]
    async fn test_inbound_message_uses_configured_qos() {
        let (session, connector) = connected(chat_config()).await;
        connector.emit(ProtocolEvent::Message {
            topic: "room1".into(),
            payload: Bytes::from_static(b"hello"),
            qos: 0,
            retain: true,
            content_type: None,
            properties: Vec::new(),
        });
        session.attempts().await.unwrap();

        let messages = session.messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Remote");
        assert!(!messages[0].is_outgoing);
        assert!(!messages[0].is_retained);
        assert_eq!(messages[0].qos, 1);

        let event = &session.events().await.unwrap()[0];
        assert_eq!(event.category, EventCategory::Receive);
        assert_eq!(event.message, "Received from room1");
        assert_eq!(event.details.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_inbound_properties_are_logged() {
        let (session, connector) = connected(chat_config()).await;
        connector.emit(ProtocolEvent::Message {
            topic: "room1".into(),
            payload: Bytes::from_static(b"hello"),
            qos: 1,
            retain: false,
            content_type: Some("text/plain".into()),
            properties: vec![("lang".into(), "en".into())],
        });
        session.attempts().await.unwrap();

        let events = session.events().await.unwrap();
        assert_eq!(events[0].message, "Message properties (v5)");
        let details = events[0].details.as_deref().unwrap();
        assert!(details.contains("Content Type: text/plain"));
        assert!(details.contains("lang"));
        assert_eq!(events[1].message, "Received from room1");
    }

    #[tokio::test]
    async fn test_non_utf8_payload_is_skipped() {
        let (session, connector) = connected(chat_config()).await;
        connector.emit(ProtocolEvent::Message {
            topic: "room1".into(),
            payload: Bytes::from_static(&[0xff, 0xfe]),
            qos: 1,
            retain: false,
            content_type: None,
            properties: Vec::new(),
        });
        session.attempts().await.unwrap();
        assert!(session.messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_are_not_logged() {
        let (session, connector) = connected(chat_config()).await;
        let before = session.events().await.unwrap().len();
        connector.emit(ProtocolEvent::Ping);
        connector.emit(ProtocolEvent::Pong);
        assert_eq!(session.events().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_acknowledgements_are_logged() {
        let (session, connector) = connected(chat_config()).await;
        session.clear_events().await.unwrap();

        connector.emit(ProtocolEvent::Published { pkid: 3 });
        connector.emit(ProtocolEvent::PubAck {
            pkid: 3,
            reason: Some("Success".into()),
        });
        connector.emit(ProtocolEvent::PubRec { pkid: 4 });
        connector.emit(ProtocolEvent::SubAck {
            succeeded: vec!["room1".into()],
            failed: vec!["bad/#".into()],
            reason_codes: vec!["Success(AtLeastOnce)".into(), "NotAuthorized".into()],
        });
        connector.emit(ProtocolEvent::UnsubAck {
            topics: vec!["room1".into()],
            reason_codes: vec![],
        });
        connector.emit(ProtocolEvent::DisconnectReason {
            code: "ServerShuttingDown".into(),
        });
        connector.emit(ProtocolEvent::AuthReason {
            code: "ContinueAuthentication".into(),
        });

        let events = session.events().await.unwrap();
        let messages: Vec<&str> = events.iter().rev().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Message published (v5)",
                "Publish acknowledged (v5)",
                "Publish received (QoS 2)",
                "Subscribed successfully (v5)",
                "Subscription failed",
                "Unsubscribed (v5)",
                "Disconnect reason (v5)",
                "Auth reason (v5)",
            ]
        );
        assert_eq!(events[7].details.as_deref(), Some("ID: 3"));
        assert_eq!(events[6].details.as_deref(), Some("ID: 3\nReason: Success"));
        assert_eq!(events[3].category, EventCategory::Error);
        assert_eq!(events[3].details.as_deref(), Some("Topics: [\"bad/#\"]"));
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        connector.emit(ProtocolEvent::ConnectFailed {
            error: "handshake failure".into(),
        });
        session.connect().await.unwrap();
        assert_eq!(connector.connect_count(), 2);

        // late CONNACK from the first attempt
        assert!(connector.sink(0).emit(ProtocolEvent::ConnAck {
            accepted: true,
            reason: "Success".into(),
            details: None,
        }));
        session.attempts().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_unsubscribe_requires_connection() {
        let (session, connector) = start(chat_config());
        session.unsubscribe().await.unwrap();
        session.subscribe().await.unwrap();
        assert!(connector.calls().is_empty());
        assert!(session.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_while_connected() {
        let (session, connector) = connected(chat_config()).await;
        session.clear_events().await.unwrap();

        session.unsubscribe().await.unwrap();
        assert_eq!(
            connector.calls().last(),
            Some(&Call::Unsubscribe("room1".into()))
        );
        let events = session.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::Subscription);
        assert_eq!(events[0].message, "Unsubscribed from room1");
    }

    #[tokio::test]
    async fn test_rejected_unsubscribe_is_logged() {
        let (session, connector) = connected(chat_config()).await;
        session.clear_events().await.unwrap();

        connector.fail_next_request(SessionError::Transport("request queue is full".into()));
        session.unsubscribe().await.unwrap();

        let events = session.events().await.unwrap();
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Unsubscribe failed");
        assert_eq!(
            events[0].details.as_deref(),
            Some("Client transfer error: request queue is full")
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_publish_is_logged() {
        let (session, connector) = connected(chat_config()).await;
        session.clear_events().await.unwrap();

        connector.fail_next_request(SessionError::Transport("request queue is full".into()));
        session.publish("lost", false).await.unwrap();

        let events = session.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Publish failed");
        assert_eq!(
            events[0].details.as_deref(),
            Some("Client transfer error: request queue is full")
        );
        // the optimistic echo stays in the history
        assert_eq!(session.messages().await.unwrap().len(), 1);
        assert_eq!(session.state(), ConnectionState::Connected);

        session.publish("next", false).await.unwrap();
        assert_eq!(
            session.events().await.unwrap()[0].message,
            "Published to room1"
        );
    }

    #[tokio::test]
    async fn test_rejected_subscribe_is_logged() {
        let (session, connector) = start(chat_config());
        session.connect().await.unwrap();
        connector.fail_next_request(SessionError::Transport("request queue is full".into()));
        connector.accept();
        session.attempts().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        let events = session.events().await.unwrap();
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Subscription failed");
        assert_eq!(
            events[0].details.as_deref(),
            Some("Failed to subscribe to topic: Client transfer error: request queue is full")
        );
        assert!(!events.iter().any(|e| e.message == "Subscribed to room1"));
    }

    #[tokio::test]
    async fn test_clear_stores() {
        let (session, connector) = connected(chat_config()).await;
        session.publish("one", false).await.unwrap();
        let mut updates = session.subscribe_updates();

        session.clear_messages().await.unwrap();
        session.clear_events().await.unwrap();
        assert!(session.messages().await.unwrap().is_empty());
        assert!(session.events().await.unwrap().is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(updates.try_recv().unwrap(), SessionUpdate::MessagesCleared);
        assert_eq!(updates.try_recv().unwrap(), SessionUpdate::EventsCleared);
        drop(connector);
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let (session, _connector) = start(chat_config());
        for _ in 0..105 {
            session.publish("x", false).await.unwrap();
        }
        assert_eq!(session.events().await.unwrap().len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_loss_pauses_and_restores() {
        let (net_tx, net_rx) = watch::channel(Reachability::default());
        let connector = MockConnector::new();
        let session = Session::builder(Arc::new(connector.clone()))
            .configuration(chat_config())
            .reachability(net_rx)
            .spawn();

        session.connect().await.unwrap();
        connector.accept();
        connector.drop_with_error("network down");
        assert_eq!(session.attempts().await.unwrap(), 1);
        assert_eq!(session.state(), ConnectionState::Reconnecting);

        net_tx.send(Reachability::offline()).unwrap();
        assert_eq!(session.attempts().await.unwrap(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        // the paused wait never fires
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);

        net_tx
            .send(Reachability::online(crate::reachability::TransportKind::Wifi))
            .unwrap();
        assert_eq!(session.attempts().await.unwrap(), 2);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_restore_at_ceiling_is_error() {
        let (net_tx, net_rx) = watch::channel(Reachability::default());
        let connector = MockConnector::new();
        let session = Session::builder(Arc::new(connector.clone()))
            .configuration(chat_config())
            .backoff(Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 1))
            .reachability(net_rx)
            .spawn();

        session.connect().await.unwrap();
        connector.accept();
        connector.drop_with_error("network down");
        assert_eq!(session.attempts().await.unwrap(), 1);

        net_tx.send(Reachability::offline()).unwrap();
        session.attempts().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        net_tx.send(Reachability::default()).unwrap();
        assert_eq!(session.attempts().await.unwrap(), 1);
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(connector.connect_count(), 1);

        let events = session.events().await.unwrap();
        assert_eq!(events[0].category, EventCategory::Error);
        assert_eq!(events[0].message, "Max reconnection attempts reached");
    }

    #[tokio::test]
    async fn test_network_restore_after_user_disconnect_does_nothing() {
        let (net_tx, net_rx) = watch::channel(Reachability::default());
        let connector = MockConnector::new();
        let session = Session::builder(Arc::new(connector.clone()))
            .configuration(chat_config())
            .reachability(net_rx)
            .spawn();

        session.disconnect().await.unwrap();
        net_tx.send(Reachability::offline()).unwrap();
        session.attempts().await.unwrap();
        net_tx.send(Reachability::default()).unwrap();
        session.attempts().await.unwrap();

        assert_eq!(connector.connect_count(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (session, connector) = connected(chat_config()).await;
        session.shutdown().await.unwrap();
        assert!(connector.calls().contains(&Call::Disconnect));
        assert!(matches!(
            session.publish("late", false).await,
            Err(SessionError::Closed)
        ));
    }
}
