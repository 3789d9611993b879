//! Application configuration.
//!
//! `Config` groups the logging setup, the chat session defaults, the
//! reachability probe and the location of the persisted settings file. It is
//! read once from TOML at startup; a missing file means defaults.

use std::{
    fs,
    path::{Path, PathBuf},
};

use mqttchat_session::Configuration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{
    logger::LoggerConfig,
    probe::{ReachabilityConfig, StorageConfig},
};

pub mod logger;
pub mod probe;

const CONFIG_ENV: &str = "MQTTCHAT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "mqttchat.toml";

#[doc(hidden)]
#[macro_export]
macro_rules! __print_line {
    ($level:expr, $($arg:tt)*) => {
        println!("{}  {} {}",
            console::style(
                time::OffsetDateTime::now_utc()
                    .format(time::macros::format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                    ))
                    .unwrap_or_default()
            ).dim(),
            $level,
            format_args!($($arg)*)
        )
    };
}

/// Timestamped console output used before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("INFO").green(), $($arg)*) };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("WARN").yellow(), $($arg)*) };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => { $crate::__print_line!(console::style("ERROR").red(), $($arg)*) };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Top-level application configuration.
///
/// ```toml
/// [logger]
/// level = "debug"
///
/// [session]
/// host = "broker.example.com"
/// topic = "chat/lobby"
/// version = "3.1.1"
///
/// [reachability]
/// probe_address = "1.1.1.1:53"
/// ```
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Session settings used when no saved settings exist.
    #[validate(nested)]
    pub session: Configuration,

    #[validate(nested)]
    pub reachability: ReachabilityConfig,

    #[validate(nested)]
    pub storage: StorageConfig,
}

impl Config {
    /// Loads the configuration from `MQTTCHAT_CONFIG`, then `./mqttchat.toml`,
    /// falling back to defaults when neither exists.
    pub fn new() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) => Self::load(&path),
            None => {
                print_warn!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn get_config_path() -> Option<PathBuf> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Some(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Some(fallback.to_path_buf());
        }
        None
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }

    /// Renders the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use mqttchat_session::{ProtocolVersion, QosLevel};

    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.session.host, "test.mosquitto.org");
        assert_eq!(config.session.port, 1883);
        assert_eq!(config.logger.level, "info");
        assert!(config.reachability.enabled);
    }

    #[test]
    fn test_session_section() {
        let config = Config::parse(
            r#"
            [session]
            host = "broker.local"
            port = 8883
            topic = "team/chat"
            use_tls = true
            version = "3.1.1"
            qos = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.session.host, "broker.local");
        assert_eq!(config.session.topic, "team/chat");
        assert!(config.session.use_tls);
        assert_eq!(config.session.version, ProtocolVersion::V311);
        assert_eq!(config.session.qos, QosLevel::ExactlyOnce);
    }

    #[test]
    fn test_invalid_topic_is_rejected() {
        let err = Config::parse(
            r#"
            [session]
            topic = "has spaces"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let err = Config::parse("[logger]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::parse("[session\nhost=").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reachability]\nenabled = false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(!config.reachability.enabled);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed = Config::parse(&rendered).unwrap();
        assert_eq!(parsed.session, config.session);
    }
}
