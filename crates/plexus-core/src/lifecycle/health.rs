use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::lifecycle::state::LifecycleState;
use crate::plugin_system::traits::PluginInstance;

/// Result of the most recent health check of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub plugin_id: String,
    pub healthy: bool,
    pub last_check: SystemTime,
    pub response_time: Duration,
    pub consecutive_failures: u32,
    pub diagnostics: HashMap<String, String>,
}

impl HealthStatus {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            healthy: true,
            last_check: SystemTime::now(),
            response_time: Duration::ZERO,
            consecutive_failures: 0,
            diagnostics: HashMap::new(),
        }
    }

    pub(crate) fn record(&mut self, healthy: bool, state: LifecycleState, response_time: Duration) {
        self.healthy = healthy;
        self.last_check = SystemTime::now();
        self.response_time = response_time;
        if healthy {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.diagnostics.insert("state".to_string(), state.to_string());
    }
}

/// Decides whether a plugin is healthy. Runs on the health-check task.
pub type HealthPredicate = Arc<dyn Fn(&dyn PluginInstance, LifecycleState) -> bool + Send + Sync>;

/// Healthy means running.
pub fn default_health_predicate() -> HealthPredicate {
    Arc::new(|_: &dyn PluginInstance, state: LifecycleState| state == LifecycleState::Running)
}

/// Restart bookkeeping for one plugin.
#[derive(Debug, Clone, Default)]
pub(crate) struct RestartTracker {
    /// Attempts since the last successful restart.
    attempts: u32,
    total: u32,
    last_restart: Option<Instant>,
}

impl RestartTracker {
    pub(crate) fn can_restart(&self, max_attempts: u32, cooldown: Duration, now: Instant) -> bool {
        if self.attempts >= max_attempts {
            return false;
        }
        self.last_restart
            .is_none_or(|last| now.saturating_duration_since(last) >= cooldown)
    }

    pub(crate) fn record_attempt(&mut self, now: Instant) {
        self.attempts += 1;
        self.total += 1;
        self.last_restart = Some(now);
    }

    pub(crate) fn record_success(&mut self) {
        self.attempts = 0;
    }

    pub(crate) fn total(&self) -> u32 {
        self.total
    }
}
