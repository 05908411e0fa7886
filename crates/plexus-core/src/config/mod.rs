//! # Runtime configuration
//!
//! [`RuntimeConfig`] gathers every tunable of the runtime: registry limits,
//! plugin search directories, lifecycle timeouts and the hot-reload switch.
//! It can be read from JSON, YAML (`yaml-config` feature) or TOML
//! (`toml-config` feature); the format is chosen from the file extension.
//! Durations are written in milliseconds (`*_ms` keys).
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_HOT_RELOAD_DEBOUNCE, DEFAULT_INITIALIZATION_TIMEOUT,
    DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_RESTART_COOLDOWN, DEFAULT_SHUTDOWN_DEADLINE,
    DEFAULT_SHUTDOWN_TIMEOUT, ERROR_LOG_LIMIT, EVENT_HISTORY_LIMIT,
};


/// Errors raised while reading or writing configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported configuration format for '{}'", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to parse {format:?} configuration: {message}")]
    Parse { format: ConfigFormat, message: String },

    #[error("Failed to serialize {format:?} configuration: {message}")]
    Serialize { format: ConfigFormat, message: String },
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

// Durations travel as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-plugin supervision settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    #[serde(rename = "initialization_timeout_ms", with = "duration_ms")]
    pub initialization_timeout: Duration,
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Apply `shutdown_timeout` to non-forced shutdowns.
    pub graceful_shutdown: bool,
    pub enable_health_monitoring: bool,
    #[serde(rename = "health_check_interval_ms", with = "duration_ms")]
    pub health_check_interval: Duration,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    #[serde(rename = "restart_cooldown_ms", with = "duration_ms")]
    pub restart_cooldown: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initialization_timeout: DEFAULT_INITIALIZATION_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            graceful_shutdown: true,
            enable_health_monitoring: false,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            auto_restart: false,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce: DEFAULT_HOT_RELOAD_DEBOUNCE,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directories scanned by front ends for plugin files.
    pub plugin_dirs: Vec<PathBuf>,
    pub max_error_log_entries: usize,
    pub event_history_limit: usize,
    #[serde(rename = "shutdown_deadline_ms", with = "duration_ms")]
    pub shutdown_deadline: Duration,
    pub lifecycle: LifecycleConfig,
    pub hot_reload: HotReloadConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            max_error_log_entries: ERROR_LOG_LIMIT,
            event_history_limit: EVENT_HISTORY_LIMIT,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            lifecycle: LifecycleConfig::default(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Reads a configuration file, picking the format from its extension.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let data = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded runtime configuration from {}", path.display());
        Self::parse(&data, format)
    }

    /// Deserialize from string based on format
    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse { format, message };
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| parse_err(e.to_string())),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| parse_err(e.to_string())),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| parse_err(e.to_string())),
        }
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let ser_err = |message: String| ConfigError::Serialize { format, message };
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| ser_err(e.to_string())),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| ser_err(e.to_string())),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ser_err(e.to_string())),
        }
    }
}
