use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// ICMP check interval of a device when none is given, in seconds
pub const DEFAULT_PING_INTERVAL: u64 = 10;

/// Check interval of a service when none is given, in seconds
pub const DEFAULT_CHECK_INTERVAL: u64 = 60;

/// Longest accepted ping or check interval, in seconds (one week)
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

pub const DEFAULT_DEVICE_KIND: &str = "Server";

/// Upper bound of a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./nodepulse.db")
}

/// HTTP/WebSocket surface configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    /// Bind address, overridden by `NODEPULSE_ADDR` / `NODEPULSE_PORT`
    pub bind: Option<String>,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: None,
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_enable_cors() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    /// Capacity of the live update channel; slow observers lag past it
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    256
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
