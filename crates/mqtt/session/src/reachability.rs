//! Network reachability signal consumed by the session.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Coarse classification of the active network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Wifi,
    Cellular,
    Wired,
    #[default]
    Unknown,
    None,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Wifi => "WiFi",
            TransportKind::Cellular => "Cellular",
            TransportKind::Wired => "Wired",
            TransportKind::Unknown => "Unknown",
            TransportKind::None => "None",
        };
        f.write_str(name)
    }
}

/// Snapshot published by a reachability monitor.
///
/// The session only reacts to changes of `online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reachability {
    pub online: bool,
    pub transport: TransportKind,
}

impl Reachability {
    pub fn online(transport: TransportKind) -> Self {
        Self {
            online: true,
            transport,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            transport: TransportKind::None,
        }
    }
}

impl Default for Reachability {
    /// Assumed online until a monitor says otherwise.
    fn default() -> Self {
        Self::online(TransportKind::Unknown)
    }
}

/// A reachability channel that never changes, for sessions without a monitor.
pub fn always_online() -> (watch::Sender<Reachability>, watch::Receiver<Reachability>) {
    watch::channel(Reachability::default())
}
