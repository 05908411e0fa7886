//! # Plexus Plugin System
//!
//! Loading, tracking and ordering of plugins.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`dependency`]**: The derived dependency graph ([`DependencyResolver`]):
//!   load order, cycle detection and resolution, unload safety.
//! - **[`error`]**: [`PluginSystemError`] and its coarse [`ErrorKind`].
//! - **[`hooks`]**: Pre-load, post-load and pre-unload callbacks.
//! - **[`hot_reload`]**: File watching that triggers reloads.
//! - **[`integrity`]**: SHA-256 verification of plugin files.
//! - **[`loader`]**: The [`Loader`] seam, with a native library loader and a
//!   JSON manifest loader.
//! - **[`manager`]**: [`PluginManager`], the transactional orchestrator.
//! - **[`metadata`]**: [`PluginMetadata`], dependencies and capability flags.
//! - **[`registry`]**: [`PluginRegistry`], the id → [`PluginRecord`] table.
//! - **[`traits`]**: [`PluginInstance`], the contract every plugin fulfils.
//! - **[`transaction`]**: Ordered operations with compensating rollback.
//! - **[`version`]**: Semver parsing and [`VersionRange`] constraints.
pub mod dependency;
pub mod error;
pub mod hooks;
pub mod hot_reload;
pub mod integrity;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod traits;
pub mod transaction;
pub mod version;

pub use dependency::{CircularDependency, DependencyNode, DependencyResolver, ResolutionStrategy};
pub use error::{ErrorKind, PluginSystemError, Result};
pub use hooks::{HookContext, HookId, HookPoint, HookRegistry};
pub use hot_reload::HotReloadManager;
pub use loader::{DynamicLibraryLoader, Loader, ManifestLoader, ManifestPlugin};
pub use manager::{BatchItemOutcome, BatchResult, LoadOptions, ManagerEvent, PluginManager};
pub use metadata::{PluginCapabilities, PluginDependency, PluginMetadata};
pub use registry::{PluginInfoUpdate, PluginRecord, PluginRegistry};
pub use traits::{PluginError, PluginInstance, PluginPriority};
pub use transaction::Transaction;
pub use version::VersionRange;

#[cfg(test)]
mod tests;
