use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::lifecycle::events::{LifecycleEvent, LifecycleEventBus, LifecycleEventKind};
use crate::lifecycle::state::LifecycleState;
use crate::plugin_system::error::{PluginSystemError, Result};

/// Transition-validated state holder for a single plugin.
///
/// The state lock is held only while checking and committing a transition;
/// publishing happens under it so events arrive in commit order.
pub struct PluginStateMachine {
    plugin_id: String,
    state: Mutex<LifecycleState>,
    events: Option<Arc<LifecycleEventBus>>,
}

impl PluginStateMachine {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            state: Mutex::new(LifecycleState::Unloaded),
            events: None,
        }
    }

    pub fn with_event_bus(plugin_id: impl Into<String>, events: Arc<LifecycleEventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(plugin_id)
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        self.state().can_transition_to(target)
    }

    /// Moves to `target` if the transition table allows it. Returns the previous state.
    pub fn transition_to(&self, target: LifecycleState) -> Result<LifecycleState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if !current.can_transition_to(target) {
            return Err(PluginSystemError::invalid_state(
                &self.plugin_id,
                format!("invalid transition {} -> {}", current, target),
            ));
        }
        *state = target;
        debug!("Plugin '{}': {} -> {}", self.plugin_id, current, target);
        self.publish(LifecycleEvent::state_changed(&self.plugin_id, current, target));
        Ok(current)
    }

    /// Administrative override back to `Unloaded`, bypassing the table.
    pub fn reset(&self) -> LifecycleState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous != LifecycleState::Unloaded {
            *state = LifecycleState::Unloaded;
            debug!("Plugin '{}' reset from {}", self.plugin_id, previous);
            self.publish(
                LifecycleEvent::state_changed(&self.plugin_id, previous, LifecycleState::Unloaded)
                    .with_message("reset"),
            );
        }
        previous
    }

    /// Administrative override to `Error`.
    pub fn force_error(&self, reason: &str) -> LifecycleState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous != LifecycleState::Error {
            *state = LifecycleState::Error;
            warn!("Plugin '{}' forced to error from {}: {}", self.plugin_id, previous, reason);
            self.publish(
                LifecycleEvent::state_changed(&self.plugin_id, previous, LifecycleState::Error)
                    .with_message(reason),
            );
        }
        previous
    }

    /// Publishes a non-transition event for this plugin.
    pub fn notify(&self, kind: LifecycleEventKind, message: impl Into<String>) {
        self.publish(LifecycleEvent::new(&self.plugin_id, kind).with_message(message));
    }

    fn publish(&self, event: LifecycleEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
