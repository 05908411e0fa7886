//! # Plexus Core
//!
//! Runtime for dynamically loadable plugins: dependency resolution, a strict
//! per-plugin lifecycle state machine with supervision, and a transactional
//! orchestrator that keeps the registry and the dependency graph consistent.
//!
//! The entry point for hosts is [`PluginManager`], constructed explicitly with
//! a [`Loader`] and a [`RuntimeConfig`]. Nothing in this crate is a process-wide
//! singleton.

pub mod config;
pub mod constants;
pub mod lifecycle;
pub mod plugin_system;

#[cfg(test)]
mod tests;

pub use config::{ConfigFormat, HotReloadConfig, LifecycleConfig, RuntimeConfig};
pub use lifecycle::{
    EventFilter, HealthStatus, LifecycleEvent, LifecycleEventKind, LifecycleState,
    LifecycleSupervisor, StateBackup, StateTransfer,
};
pub use plugin_system::{
    BatchItemOutcome, BatchResult, DependencyResolver, DynamicLibraryLoader, ErrorKind, HookId,
    LoadOptions, Loader, ManagerEvent, ManifestLoader, PluginCapabilities, PluginError,
    PluginInstance, PluginManager, PluginMetadata, PluginPriority, PluginRecord,
    PluginSystemError, ResolutionStrategy, Result, Transaction,
};
