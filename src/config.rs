//! Configuration module
//!
//! Loaded from a TOML file (default `~/.config/ocpp-central/config.toml`).
//! Every field has a default, so a partial file or no file at all works.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EngineSettings, SetupOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-central")
        .join("config.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ocpp: OcppConfig,
    pub logging: LoggingConfig,
    pub charge_points: Vec<ChargePointConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            timeout: Duration::from_secs(self.ocpp.timeout_secs),
            message_expiry: Duration::from_secs(self.ocpp.message_expiry_secs),
            transaction_expiry: Duration::from_secs(self.ocpp.transaction_expiry_secs),
            default_id_tag: self.ocpp.default_id_tag.clone(),
        }
    }
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for connection cleanup on shutdown
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcppConfig {
    /// Boot timer and confirmation timeout
    pub timeout_secs: u64,
    pub message_expiry_secs: u64,
    pub transaction_expiry_secs: u64,
    /// Period of the per-connector meter watchdog
    pub watchdog_interval_secs: u64,
    /// How long the supervisor waits for a configured charge point to connect
    pub connect_timeout_secs: u64,
    pub default_id_tag: String,
}

impl OcppConfig {
    /// Never zero; a zero period would make the ticker panic.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for OcppConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            timeout_secs: engine.timeout.as_secs(),
            message_expiry_secs: engine.message_expiry.as_secs(),
            transaction_expiry_secs: engine.transaction_expiry.as_secs(),
            watchdog_interval_secs: 10,
            connect_timeout_secs: 3600,
            default_id_tag: engine.default_id_tag,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive
    pub level: String,
    /// Emit JSON lines instead of the human readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// A charge point the central system expects to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargePointConfig {
    pub id: String,
    /// Connector ids supervised after setup
    pub connectors: Vec<u32>,
    /// Issue RemoteStartTransaction when a connector is Preparing
    pub remote_start: bool,
    /// idTag for remote start. Falls back to the vendor idTag reported
    /// during setup, then to `ocpp.default_id_tag`.
    pub remote_id_tag: Option<String>,
    pub meter_values: String,
    pub meter_interval_secs: u64,
    pub force_power_control: bool,
}

impl ChargePointConfig {
    pub fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            meter_values: self.meter_values.clone(),
            meter_interval: Duration::from_secs(self.meter_interval_secs),
            force_power_control: self.force_power_control,
        }
    }
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            connectors: vec![1],
            remote_start: false,
            remote_id_tag: None,
            meter_values: String::new(),
            meter_interval_secs: 10,
            force_power_control: false,
        }
    }
}
