//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (NOMAD_GW_*)
//! 2. TOML config file (if NOMAD_GW_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Runtime-mutable cache policy lives in [`crate::settings`], not here.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (NOMAD_GW_*)
/// 2. TOML config file (if NOMAD_GW_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root of the per-node cache tree.
    ///
    /// Set via NOMAD_GW_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// JSON file holding the persisted cache settings.
    ///
    /// Set via NOMAD_GW_SETTINGS_PATH environment variable.
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// Entry-point page requested from every node.
    #[serde(default = "default_primary_page")]
    pub primary_page: String,

    /// Page fetch timeout in milliseconds.
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// File download timeout in milliseconds.
    #[serde(default = "default_file_timeout_ms")]
    pub file_timeout_ms: u64,

    /// Ping timeout in milliseconds.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Budget for path discovery in milliseconds.
    #[serde(default = "default_path_timeout_ms")]
    pub path_timeout_ms: u64,

    /// Interval between path table checks while discovering.
    #[serde(default = "default_path_poll_interval_ms")]
    pub path_poll_interval_ms: u64,

    /// How long an idle cache worker waits before re-checking for shutdown.
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Capacity of each cache work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Lifetime of the cached connection status snapshot.
    #[serde(default = "default_status_cache_ms")]
    pub status_cache_ms: u64,

    /// Log output format.
    ///
    /// Set via NOMAD_GW_LOG_FORMAT environment variable ("text" or "json").
    #[serde(default)]
    pub log_format: LogFormat,

    /// Default log filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache/nodes")
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("./settings/cache_settings.json")
}

fn default_primary_page() -> String {
    "/page/index.mu".into()
}

fn default_page_timeout_ms() -> u64 {
    30_000
}

fn default_file_timeout_ms() -> u64 {
    60_000
}

fn default_ping_timeout_ms() -> u64 {
    15_000
}

fn default_path_timeout_ms() -> u64 {
    30_000
}

fn default_path_poll_interval_ms() -> u64 {
    100
}

fn default_worker_poll_interval_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_status_cache_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            settings_path: default_settings_path(),
            primary_page: default_primary_page(),
            page_timeout_ms: default_page_timeout_ms(),
            file_timeout_ms: default_file_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            path_timeout_ms: default_path_timeout_ms(),
            path_poll_interval_ms: default_path_poll_interval_ms(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            status_cache_ms: default_status_cache_ms(),
            log_format: LogFormat::Text,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_millis(self.file_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn path_timeout(&self) -> Duration {
        Duration::from_millis(self.path_timeout_ms)
    }

    pub fn path_poll_interval(&self) -> Duration {
        Duration::from_millis(self.path_poll_interval_ms)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn status_cache(&self) -> Duration {
        Duration::from_millis(self.status_cache_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `NOMAD_GW_`
    /// 2. TOML file from `NOMAD_GW_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("NOMAD_GW_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("NOMAD_GW_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
