//! Terminal chat console: input commands and output rendering.

use console::style;
use mqttchat_session::{ConnectionState, Event, EventCategory, Message, SessionUpdate};
use time::macros::format_description;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text, published as a chat message.
    Say(String),
    /// `/retain <text>`.
    SayRetained(String),
    Connect,
    Disconnect,
    Events,
    Messages,
    ClearMessages,
    ClearEvents,
    Save,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub const HELP: &str = "\
Commands:
  <text>           publish a message on the session topic
  /retain <text>   publish a retained message
  /connect         connect to the broker
  /disconnect      disconnect from the broker
  /events          show the event log (newest first)
  /messages        show the message history
  /clear           clear the message history
  /clear-events    clear the event log
  /save            save the current settings
  /help            show this help
  /quit            disconnect and exit";

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Input::Empty;
        }
        if !line.starts_with('/') {
            return Input::Say(line.to_string());
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            "/retain" if !rest.is_empty() => Input::SayRetained(rest.to_string()),
            "/connect" => Input::Connect,
            "/disconnect" => Input::Disconnect,
            "/events" => Input::Events,
            "/messages" => Input::Messages,
            "/clear" => Input::ClearMessages,
            "/clear-events" => Input::ClearEvents,
            "/save" => Input::Save,
            "/help" => Input::Help,
            "/quit" | "/exit" => Input::Quit,
            _ => Input::Unknown(line.to_string()),
        }
    }
}

fn clock(timestamp: time::OffsetDateTime) -> String {
    timestamp
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

pub fn render_state(state: ConnectionState) -> String {
    let label = match state {
        ConnectionState::Connected => style(state.label()).green(),
        ConnectionState::Error => style(state.label()).red(),
        ConnectionState::Disconnected => style(state.label()).dim(),
        _ => style(state.label()).yellow(),
    };
    format!("-- {label} --")
}

pub fn render_message(message: &Message) -> String {
    let mut flags = format!("QoS {}", message.qos);
    if message.is_retained {
        flags.push_str(", retained");
    }
    let sender = if message.is_outgoing {
        style(message.sender.as_str()).cyan()
    } else {
        style(message.sender.as_str()).magenta()
    };
    format!(
        "{} {sender} {} {} {}",
        style(clock(message.timestamp)).dim(),
        style(format!("#{}", message.topic)).dim(),
        message.content,
        style(format!("[{flags}]")).dim()
    )
}

pub fn render_event(event: &Event) -> String {
    let category = match event.category {
        EventCategory::Error => style(event.category.as_str()).red(),
        EventCategory::Connection => style(event.category.as_str()).green(),
        EventCategory::Debug => style(event.category.as_str()).dim(),
        _ => style(event.category.as_str()).blue(),
    };
    let mut line = format!(
        "{} [{category}] {}",
        style(clock(event.timestamp)).dim(),
        event.message
    );
    if let Some(details) = &event.details {
        for detail in details.lines() {
            line.push_str("\n      ");
            line.push_str(detail);
        }
    }
    line
}

/// Live output for an update. Echoes of our own messages are printed by the
/// prompt, and Debug events stay in the log.
pub fn render_update(update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::StateChanged(state) => Some(render_state(*state)),
        SessionUpdate::MessageAppended(message) if !message.is_outgoing => {
            Some(render_message(message))
        }
        SessionUpdate::EventLogged(event) if event.category == EventCategory::Error => {
            Some(render_event(event))
        }
        _ => None,
    }
}
