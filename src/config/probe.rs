//! `[reachability]` and `[storage]` sections.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// TCP probe used to decide whether the network is up.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReachabilityConfig {
    /// When off, the session is told the network is always up.
    pub enabled: bool,

    /// `host:port` to open a TCP connection to.
    #[validate(custom(function = "validate_probe_address"))]
    pub probe_address: String,

    #[validate(range(min = 1, max = 3600))]
    pub interval_secs: u64,

    #[validate(range(min = 1, max = 60))]
    pub timeout_secs: u64,
}

fn validate_probe_address(address: &str) -> Result<(), ValidationError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0) => {
            Ok(())
        }
        _ => {
            let mut err = ValidationError::new("invalid_probe_address");
            err.message = Some(format!("Probe address must be host:port, got '{address}'").into());
            Err(err)
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_address: "1.1.1.1:53".to_string(),
            interval_secs: 5,
            timeout_secs: 3,
        }
    }
}

impl ReachabilityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the settings edited at runtime are saved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    pub settings_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("mqttchat-settings.json"),
        }
    }
}
