//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, local_config_path};
use super::Result;

/// Environment variable that overrides the configured backend hostname
pub const HOSTNAME_ENV: &str = "TH_CLI_HOSTNAME";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Event stream settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Run log settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Host (and optional port) of the test harness backend
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Use TLS (https/wss) instead of http/ws
    #[serde(default)]
    pub tls: bool,

    /// Timeout for individual REST requests
    #[serde(default = "default_request_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            tls: false,
            request_timeout_secs: default_request_secs(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_request_secs() -> u64 {
    30
}

impl BackendConfig {
    /// Base URL for REST calls, e.g. `http://localhost`
    pub fn http_base(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.hostname)
    }

    /// URL of the event stream endpoint
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}/api/v1/ws", scheme, self.hostname)
    }
}

/// Event stream reconnection settings
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// First reconnection delay
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for the reconnection delay
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Consecutive failed reconnection attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Whether the backend replays events after a cursor on reconnect
    #[serde(default)]
    pub resume: bool,

    /// Events buffered between the connection task and the consumer
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            resume: false,
            buffer: default_buffer(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_buffer() -> usize {
    256
}

impl StreamConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms.max(self.backoff_base_ms))
    }
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long an abort waits for the run to reach a terminal state
    #[serde(default = "default_abort_secs")]
    pub abort_secs: u64,

    /// Default overall timeout for `run-tests` (none when unset)
    #[serde(default)]
    pub run_secs: Option<u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            abort_secs: default_abort_secs(),
            run_secs: None,
        }
    }
}

fn default_abort_secs() -> u64 {
    60
}

/// Run log settings
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Directory that receives one log file per test run
    #[serde(default = "default_output_log_path")]
    pub output_log_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output_log_path: default_output_log_path(),
        }
    }
}

fn default_output_log_path() -> PathBuf {
    PathBuf::from("./run_logs")
}

impl Config {
    /// Load configuration from `./th-cli.toml` or the user config file
    ///
    /// Returns default configuration if neither exists
    pub fn load() -> Result<Self> {
        let candidates = [Some(local_config_path()), config_path()];
        let mut config = Self::default();
        for path in candidates.into_iter().flatten() {
            if path.exists() {
                config = Self::load_from(&path)?;
                break;
            }
        }
        if let Ok(hostname) = std::env::var(HOSTNAME_ENV) {
            if !hostname.trim().is_empty() {
                config.backend.hostname = hostname.trim().to_string();
            }
        }
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, &e))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.hostname.trim().is_empty() {
            return Err(super::Error::Config("backend.hostname cannot be empty".to_string()));
        }
        if self.stream.buffer == 0 {
            return Err(super::Error::Config("stream.buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}
