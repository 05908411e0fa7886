use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle states a plugin moves through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
    Reloading,
}

impl LifecycleState {
    /// States reachable from `self` in one validated transition.
    pub fn valid_transitions(self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Unloaded => &[Loading],
            Loading => &[Loaded, Error],
            Loaded => &[Initializing, Error],
            Initializing => &[Running, Error],
            Running => &[Paused, Stopping, Error],
            Paused => &[Running, Stopping, Error],
            Stopping => &[Stopped],
            Stopped => &[Unloaded],
            Error => &[Reloading],
            Reloading => &[Loaded, Error],
        }
    }

    pub fn can_transition_to(self, target: LifecycleState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Running or paused: the plugin holds live resources.
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Error => "error",
            LifecycleState::Reloading => "reloading",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
