//! Server configuration - every tunable of the monitoring server as TOML.
//!
//! Each section implements `Default` with the values in [`super::defaults`],
//! so an empty or missing file yields a working server.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use super::ConfigError;
use crate::pipeline::ReductionMode;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MONITOR_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "monitor.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a monitoring server deployment.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$MONITOR_CONFIG` env var
/// 2. `./monitor.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Dashboard HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Machine ingest listener
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Rollup store and raw logs
    #[serde(default)]
    pub storage: StorageConfig,

    /// Live fan-out namespaces
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Anomaly notifications
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Statistical reduction per sensor type
    #[serde(default)]
    pub stats: StatsConfig,
}

impl MonitorConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded monitor config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded monitor config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found - using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all values for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("server.addr is not a socket address: {}", self.server.addr));
        }
        if self.ingest.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("ingest.addr is not a socket address: {}", self.ingest.addr));
        }
        if self.ingest.max_frame_bytes == 0 {
            errors.push("ingest.max_frame_bytes must be > 0".to_string());
        }
        if self.fanout.replay_capacity == 0 {
            errors.push("fanout.replay_capacity must be > 0".to_string());
        }
        if self.fanout.channel_capacity == 0 {
            errors.push("fanout.channel_capacity must be > 0".to_string());
        }
        if self.notify.cooldown_secs == 0 {
            errors.push("notify.cooldown_secs must be > 0".to_string());
        }
        if self.notify.topic.trim().is_empty() {
            errors.push("notify.topic must not be empty".to_string());
        }
        if let Some(url) = &self.notify.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("notify.webhook_url must be an http(s) URL: {url}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Overridden by `--addr` / `MONITOR_HTTP_ADDR`.
    #[serde(default = "default_http_addr")]
    pub addr: String,

    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_http_addr() -> String {
    defaults::HTTP_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
            cors_origins: Vec::new(),
        }
    }
}

/// Machine ingest listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Bind address. Overridden by `--ingest-addr` / `MONITOR_INGEST_ADDR`.
    #[serde(default = "default_ingest_addr")]
    pub addr: String,

    /// Largest accepted envelope frame in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_ingest_addr() -> String {
    defaults::INGEST_ADDR.to_string()
}

const fn default_max_frame_bytes() -> usize {
    defaults::MAX_FRAME_BYTES
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            addr: default_ingest_addr(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database directory for rollup tables and the anomaly log
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for per-day raw sample CSV logs
    #[serde(default = "default_raw_log_dir")]
    pub raw_log_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(defaults::DB_PATH)
}

fn default_raw_log_dir() -> PathBuf {
    PathBuf::from(defaults::RAW_LOG_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            raw_log_dir: default_raw_log_dir(),
        }
    }
}

/// Fan-out namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Minute updates retained per sensor for late subscribers
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// Broadcast depth per namespace before a slow subscriber lags
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_replay_capacity() -> usize {
    defaults::REPLAY_CAPACITY
}

const fn default_channel_capacity() -> usize {
    defaults::SUBSCRIBER_CHANNEL_CAPACITY
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Anomaly notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Cooldown between two delivered notifications (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Notification topic
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Webhook receiving notifications as JSON. Unset = log only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

const fn default_cooldown_secs() -> u64 {
    defaults::NOTIFY_COOLDOWN_SECS
}

fn default_topic() -> String {
    defaults::NOTIFY_TOPIC.to_string()
}

impl NotifyConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            topic: default_topic(),
            webhook_url: None,
        }
    }
}

/// Reduction mode per declared sensor type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Sensor type -> reduction mode. Unlisted types reduce as `raw`.
    #[serde(default = "default_modes")]
    pub modes: BTreeMap<String, ReductionMode>,
}

fn default_modes() -> BTreeMap<String, ReductionMode> {
    BTreeMap::from([
        ("VIB".to_string(), ReductionMode::Absolute),
        ("TEMP".to_string(), ReductionMode::Raw),
    ])
}

impl StatsConfig {
    /// Reduction mode for a declared sensor type.
    pub fn mode_for(&self, sensor_type: Option<&str>) -> ReductionMode {
        sensor_type
            .and_then(|t| self.modes.get(t).copied())
            .unwrap_or(ReductionMode::Raw)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { modes: default_modes() }
    }
}
