//! # Plexus Plugin System Errors
//!
//! Defines [`PluginSystemError`], the single error type returned by the
//! registry, the dependency resolver, the lifecycle supervisor and the
//! orchestrator. Every variant maps onto one [`ErrorKind`] so callers can
//! branch on the category without matching the payload.
//!
//! Failures reported by plugin instances themselves use the lighter
//! [`PluginError`](crate::plugin_system::traits::PluginError) and are converted
//! at the call site with [`PluginSystemError::from_plugin_error`].
use std::fmt;
use std::path::PathBuf;

use crate::plugin_system::traits::PluginError;

/// Category of a [`PluginSystemError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameters,
    FileNotFound,
    InvalidFormat,
    LoadFailed,
    UnloadFailed,
    AlreadyExists,
    NotFound,
    InvalidState,
    DependencyMissing,
    CircularDependency,
    SecurityViolation,
    OperationCancelled,
    ExecutionFailed,
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug names double as stable identifiers in logs
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("Plugin file not found: '{}'", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Invalid plugin format for '{}': {message}", path.display())]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Plugin loading failed for '{plugin_id}': {message}")]
    LoadFailed { plugin_id: String, message: String },

    #[error("Plugin unloading failed for '{plugin_id}': {message}")]
    UnloadFailed { plugin_id: String, message: String },

    #[error("Plugin '{plugin_id}' is already registered")]
    AlreadyExists { plugin_id: String },

    #[error("Plugin '{plugin_id}' not found")]
    NotFound { plugin_id: String },

    #[error("Invalid state for plugin '{plugin_id}': {message}")]
    InvalidState { plugin_id: String, message: String },

    #[error("Dependency error for plugin '{plugin_id}': {message}")]
    DependencyMissing {
        plugin_id: String,
        dependency: Option<String>,
        message: String,
    },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Security violation for '{subject}': {message}")]
    SecurityViolation { subject: String, message: String },

    #[error("Operation '{operation}' cancelled for plugin '{plugin_id}': {message}")]
    OperationCancelled {
        plugin_id: String,
        operation: String,
        message: String,
    },

    #[error("Execution failed in plugin '{plugin_id}': {message}", plugin_id = .plugin_id.as_deref().unwrap_or("<unknown>"))]
    ExecutionFailed {
        plugin_id: Option<String>,
        message: String,
    },

    #[error("Operation not supported: {message}")]
    NotSupported { message: String },
}

impl PluginSystemError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::LoadFailed { .. } => ErrorKind::LoadFailed,
            Self::UnloadFailed { .. } => ErrorKind::UnloadFailed,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::DependencyMissing { .. } => ErrorKind::DependencyMissing,
            Self::CircularDependency { .. } => ErrorKind::CircularDependency,
            Self::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            Self::OperationCancelled { .. } => ErrorKind::OperationCancelled,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
        }
    }

    /// The plugin this error concerns, when there is exactly one.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::LoadFailed { plugin_id, .. }
            | Self::UnloadFailed { plugin_id, .. }
            | Self::AlreadyExists { plugin_id }
            | Self::NotFound { plugin_id }
            | Self::InvalidState { plugin_id, .. }
            | Self::DependencyMissing { plugin_id, .. }
            | Self::OperationCancelled { plugin_id, .. } => Some(plugin_id.as_str()),
            Self::ExecutionFailed { plugin_id, .. } => plugin_id.as_deref(),
            _ => None,
        }
    }

    pub fn not_found(plugin_id: impl Into<String>) -> Self {
        Self::NotFound { plugin_id: plugin_id.into() }
    }

    pub fn execution_failed(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            plugin_id: Some(plugin_id.into()),
            message: message.into(),
        }
    }

    pub fn invalid_state(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    /// Converts a failure reported by a plugin instance into `ExecutionFailed`.
    pub fn from_plugin_error(plugin_id: &str, error: PluginError) -> Self {
        Self::execution_failed(plugin_id, error.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PluginSystemError>;
