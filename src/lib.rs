//! mqttchat: terminal chat over MQTT
//!
//! Host application around the `mqttchat_session` crate: configuration,
//! logging, a network reachability probe, persisted settings and the
//! line-oriented chat console.
//!
//! ## Modules
//!
//! * `config`: TOML configuration (`[logger]`, `[session]`, `[reachability]`,
//!   `[storage]`) validated with `validator`.
//!
//! * `core`: Runtime collaborators of the session:
//!   - TCP reachability probe feeding the session's reachability channel
//!   - JSON settings store
//!
//! * `chat`: Command parsing and rendering for the terminal driver.
//!
//! * `logger`: `tracing` subscriber setup with console and journald outputs.

pub mod chat;
pub mod config;
pub mod core;
pub mod logger;
