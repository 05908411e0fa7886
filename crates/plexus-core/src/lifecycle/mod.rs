//! # Plexus Lifecycle Management
//!
//! Per-plugin lifecycle handling:
//!
//! - [`LifecycleState`] and its fixed transition table.
//! - [`PluginStateMachine`], which validates and commits transitions and
//!   publishes each one on the [`LifecycleEventBus`].
//! - [`LifecycleSupervisor`], which owns one machine per plugin and adds
//!   timeouts, health monitoring with auto-restart, state backup for reloads,
//!   and bulk shutdown against a deadline.
pub mod backup;
pub mod events;
pub mod health;
pub mod machine;
pub mod state;
pub mod supervisor;

pub use backup::{StateBackup, StateTransfer};
pub use events::{EventFilter, LifecycleEvent, LifecycleEventBus, LifecycleEventKind, SubscriptionId};
pub use health::{HealthPredicate, HealthStatus, default_health_predicate};
pub use machine::PluginStateMachine;
pub use state::LifecycleState;
pub use supervisor::LifecycleSupervisor;

#[cfg(test)]
mod tests;
