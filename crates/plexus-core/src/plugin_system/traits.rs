use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::LifecycleState;
use crate::plugin_system::metadata::PluginMetadata;

/// Priority levels for plugins
///
/// Lower values are more important. The numeric value must fall inside the
/// band of its variant; [`FromStr`] enforces this for `"core:80"` style input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PluginPriority {
    /// Reserved for kernel (0-10)
    Kernel(u8),
    /// Critical core functionality (11-50)
    CoreCritical(u8),
    /// Standard core functionality (51-100)
    Core(u8),
    /// High-priority third-party (101-150)
    ThirdPartyHigh(u8),
    /// Standard third-party (151-200)
    ThirdParty(u8),
    /// Low-priority third-party (201-255)
    ThirdPartyLow(u8),
}

impl PluginPriority {
    /// Get the numeric value of the priority
    pub fn value(&self) -> u8 {
        match self {
            PluginPriority::Kernel(val)
            | PluginPriority::CoreCritical(val)
            | PluginPriority::Core(val)
            | PluginPriority::ThirdPartyHigh(val)
            | PluginPriority::ThirdParty(val)
            | PluginPriority::ThirdPartyLow(val) => *val,
        }
    }

    // Band index, used to order variants before values
    fn band(&self) -> u8 {
        match self {
            PluginPriority::Kernel(_) => 0,
            PluginPriority::CoreCritical(_) => 1,
            PluginPriority::Core(_) => 2,
            PluginPriority::ThirdPartyHigh(_) => 3,
            PluginPriority::ThirdParty(_) => 4,
            PluginPriority::ThirdPartyLow(_) => 5,
        }
    }
}

impl Default for PluginPriority {
    fn default() -> Self {
        PluginPriority::ThirdParty(175)
    }
}

impl FromStr for PluginPriority {
    type Err = String;

    /// Parse a priority string like "core:80"
    fn from_str(priority_str: &str) -> Result<Self, Self::Err> {
        let (band, value) = priority_str
            .split_once(':')
            .ok_or_else(|| format!("priority '{}' must look like 'band:value'", priority_str))?;
        let value: u8 = value
            .trim()
            .parse()
            .map_err(|_| format!("priority value in '{}' is not a number in 0-255", priority_str))?;

        let (priority, range) = match band.trim().to_lowercase().as_str() {
            "kernel" => (PluginPriority::Kernel(value), 0..=10),
            "core_critical" | "corecritical" => (PluginPriority::CoreCritical(value), 11..=50),
            "core" => (PluginPriority::Core(value), 51..=100),
            "third_party_high" | "thirdpartyhigh" => (PluginPriority::ThirdPartyHigh(value), 101..=150),
            "third_party" | "thirdparty" => (PluginPriority::ThirdParty(value), 151..=200),
            "third_party_low" | "thirdpartylow" => (PluginPriority::ThirdPartyLow(value), 201..=255),
            other => return Err(format!("unknown priority band '{}'", other)),
        };

        if !range.contains(&value) {
            return Err(format!(
                "priority value {} is outside the {}-{} band of '{}'",
                value,
                range.start(),
                range.end(),
                band
            ));
        }
        Ok(priority)
    }
}

impl TryFrom<String> for PluginPriority {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PluginPriority> for String {
    fn from(priority: PluginPriority) -> Self {
        priority.to_string()
    }
}

impl fmt::Display for PluginPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginPriority::Kernel(val) => write!(f, "kernel:{}", val),
            PluginPriority::CoreCritical(val) => write!(f, "core_critical:{}", val),
            PluginPriority::Core(val) => write!(f, "core:{}", val),
            PluginPriority::ThirdPartyHigh(val) => write!(f, "third_party_high:{}", val),
            PluginPriority::ThirdParty(val) => write!(f, "third_party:{}", val),
            PluginPriority::ThirdPartyLow(val) => write!(f, "third_party_low:{}", val),
        }
    }
}

impl PartialOrd for PluginPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare by priority band, then by value within it
        self.band()
            .cmp(&other.band())
            .then_with(|| self.value().cmp(&other.value()))
    }
}

/// Failure reported by a plugin instance.
///
/// The runtime converts these into
/// [`PluginSystemError::ExecutionFailed`](crate::plugin_system::PluginSystemError)
/// when it calls into the plugin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin initialization error: {0}")]
    InitError(String),
    #[error("Plugin configuration error: {0}")]
    ConfigError(String),
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Plugin shutdown error: {0}")]
    ShutdownError(String),
}

/// A running plugin instance, as produced by a [`Loader`](crate::plugin_system::Loader).
///
/// Calls are synchronous and may block; the supervisor runs them on tokio's
/// blocking pool. Implementations must tolerate `shutdown` being called twice
/// (graceful shutdown re-invokes it after a timeout).
pub trait PluginInstance: Send + Sync {
    /// Unique identifier, stable across reloads of the same plugin.
    fn id(&self) -> &str;

    fn metadata(&self) -> &PluginMetadata;

    /// The plugin's own view of its state. The supervisor's state machine is
    /// authoritative; this is informational.
    fn state(&self) -> LifecycleState;

    fn initialize(&self) -> Result<(), PluginError>;

    fn shutdown(&self) -> Result<(), PluginError>;

    fn configure(&self, config: &Value) -> Result<(), PluginError>;

    fn execute_command(&self, name: &str, args: &Value) -> Result<Value, PluginError>;

    fn available_commands(&self) -> Vec<String>;
}
