//! Configuration module
//!
//! The service reads a single TOML file (default
//! `~/.config/raknah-gate/config.toml`). Every section and field has a
//! default, so an empty or missing file yields a runnable development setup
//! against a local broker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "RAKNAH_GATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Default config location: `<config dir>/raknah-gate/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("raknah-gate")
        .join("config.toml")
}

/// Resolve the config path from `RAKNAH_GATE_CONFIG`, falling back to the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttSection,
    pub gate: GateSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
    pub server: ServerSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive_secs: u64,
    /// Delay before reconnecting after the connection drops
    pub reconnect_delay_secs: u64,
    /// Keep the broker-side session (subscriptions, queued QoS 1 messages)
    /// across reconnects
    pub clean_session: bool,
    /// Capacity of the client request queue
    pub request_capacity: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "raknah-gate".to_string(),
            username: None,
            password: None,
            use_tls: false,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
            clean_session: false,
            request_capacity: 64,
        }
    }
}

impl MqttSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Gate command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    /// Topic namespace. Spots without a device id use `{prefix}/open` and
    /// `{prefix}/status`; spots with one use `{prefix}/{device}/open|status`.
    pub topic_prefix: String,
    /// How long to wait for the device to report back
    pub response_timeout_ms: u64,
    /// Broker-side expiry of the (retained) open command
    pub command_expiry_secs: u32,
    /// Publish the open command with the retain flag
    pub retain_command: bool,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            topic_prefix: "parking/gate".to_string(),
            response_timeout_ms: 5_000,
            command_expiry_secs: 180,
            retain_command: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Database URL (e.g., "sqlite://./raknah.db?mode=rwc")
    pub url: String,
    pub max_connections: Option<u32>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://./raknah.db?mode=rwc".to_string(),
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// EnvFilter directive, e.g. "info" or "raknah_gate=debug,rumqttc=warn"
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    /// Prometheus scrape listener address
    pub listen: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Upper bound for graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: AppConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the gate protocol misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.client_id must not be empty".into()));
        }
        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(ConfigError::Invalid(
                "mqtt.username and mqtt.password must be set together".into(),
            ));
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::Invalid("mqtt.request_capacity must be > 0".into()));
        }

        let prefix = self.gate.topic_prefix.trim_matches('/');
        if prefix.is_empty() || prefix.contains(['+', '#']) {
            return Err(ConfigError::Invalid(
                "gate.topic_prefix must be a non-empty topic without wildcards".into(),
            ));
        }
        if self.gate.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid("gate.response_timeout_ms must be > 0".into()));
        }
        if self.gate.command_expiry_secs == 0 {
            return Err(ConfigError::Invalid("gate.command_expiry_secs must be > 0".into()));
        }

        if self.metrics.enabled && self.metrics.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "metrics.listen is not a socket address: {}",
                self.metrics.listen
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_gate_behavior() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.gate.topic_prefix, "parking/gate");
        assert_eq!(cfg.gate.response_timeout_ms, 5_000);
        assert_eq!(cfg.gate.command_expiry_secs, 180);
        assert!(cfg.gate.retain_command);
        assert_eq!(cfg.mqtt.reconnect_delay(), Duration::from_secs(5));
        assert!(!cfg.mqtt.clean_session);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [mqtt]
            host = "broker.example.net"
            port = 8883
            use_tls = true
            username = "raknah"
            password = "secret"

            [gate]
            response_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(cfg.mqtt.host, "broker.example.net");
        assert_eq!(cfg.mqtt.port, 8883);
        assert!(cfg.mqtt.use_tls);
        assert_eq!(cfg.mqtt.client_id, "raknah-gate");
        assert_eq!(cfg.gate.response_timeout_ms, 2500);
        assert_eq!(cfg.gate.command_expiry_secs, 180);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn username_without_password_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.mqtt.username = Some("raknah".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn wildcard_prefix_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.gate.topic_prefix = "parking/+".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.gate.response_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("raknah-gate-does-not-exist.toml");
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.mqtt.port, 1883);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let path = std::env::temp_dir().join(format!("raknah-gate-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[mqtt\nport = ").unwrap();
        let result = AppConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
