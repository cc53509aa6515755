//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `portbridge.toml` in the working directory (or the file named
//! by `PORTBRIDGE_CONFIG`). Every field has a sensible default so the file
//! is optional. Environment variables take precedence over file values.

use secrecy::SecretString;
use serde::Deserialize;

use portbridge_adapter_backup_fs::BackupConfig;
use portbridge_adapter_device_http_ws::{DeviceConfig, ScanConfig};
use portbridge_adapter_hub_ws::HubConfig;
use portbridge_domain::schedule::ScheduleConfig;

const DEFAULT_PATH: &str = "portbridge.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Controller transport.
    pub device: DeviceConfig,
    /// Home-automation hub connection.
    pub hub: HubConfig,
    /// Snapshot and log storage.
    pub backup: BackupConfig,
    /// Wall-clock schedule of the periodic jobs.
    pub schedule: ScheduleConfig,
    /// Network discovery.
    pub scan: ScanConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from the config file (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PORTBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Override file values with whatever `lookup` finds.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PORTBRIDGE_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("PORTBRIDGE_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = lookup("PORTBRIDGE_BIND")
            && let Some((host, port)) = val.rsplit_once(':')
        {
            self.server.host = host.to_string();
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = lookup("PORTBRIDGE_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = lookup("PORTBRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("PORTBRIDGE_HUB_URL") {
            self.hub.url = val;
        }
        if let Some(val) = lookup("PORTBRIDGE_HUB_TOKEN") {
            self.hub.token = Some(SecretString::from(val));
        }
        if let Some(enabled) = lookup("PORTBRIDGE_HUB_ENABLED").and_then(|val| val.parse().ok()) {
            self.hub.enabled = enabled;
        }
        if let Some(val) = lookup("PORTBRIDGE_SCAN_NETWORK") {
            self.scan.network = val;
        }
        if let Some(val) = lookup("PORTBRIDGE_BACKUP_DIR") {
            self.backup.logs_dir = std::path::Path::new(&val).join("logs");
            self.backup.root_dir = val.into();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.schedule.config_hour > 23 || self.schedule.logs_hour > 23 {
            return Err(ConfigError::Validation(
                "schedule hours must be between 0 and 23".to_string(),
            ));
        }
        if self.schedule.logs_minute > 59 {
            return Err(ConfigError::Validation(
                "schedule minute must be between 0 and 59".to_string(),
            ));
        }
        if self.schedule.logs_period_hours == 0 {
            return Err(ConfigError::Validation(
                "log export period must be at least one hour".to_string(),
            ));
        }
        if self.scan.concurrency == 0 {
            return Err(ConfigError::Validation(
                "scan concurrency must be non-zero".to_string(),
            ));
        }
        if self.hub.entity_namespace.trim().is_empty() {
            return Err(ConfigError::Validation(
                "hub entity namespace must not be empty".to_string(),
            ));
        }
        if self.hub.enabled {
            self.hub
                .websocket_url()
                .map_err(|err| ConfigError::Validation(format!("hub url: {err}")))?;
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:portbridge.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "portbridged=info,portbridge=info,tower_http=debug".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
