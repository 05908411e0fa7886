use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{BACKUP_STATE_COMMAND, MIGRATE_STATE_COMMAND, RESTORE_STATE_COMMAND};
use crate::lifecycle::events::LifecycleEvent;
use crate::lifecycle::health::HealthStatus;
use crate::plugin_system::error::{PluginSystemError, Result};
use crate::plugin_system::traits::PluginInstance;

/// Snapshot of a plugin taken before a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBackup {
    pub plugin_id: String,
    /// Last configuration blob applied through `configure`.
    pub configuration: Value,
    pub recent_events: Vec<LifecycleEvent>,
    pub health: Option<HealthStatus>,
    /// Payload returned by the plugin's native `backup_state` command.
    pub state: Option<Value>,
    pub created_at: SystemTime,
}

impl StateBackup {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PluginSystemError::InvalidParameters {
            message: format!("failed to serialize state backup for '{}': {}", self.plugin_id, e),
        })
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| PluginSystemError::InvalidParameters {
            message: format!("invalid state backup: {}", e),
        })
    }

    /// Native payload if present, otherwise the configuration.
    pub fn payload(&self) -> &Value {
        self.state.as_ref().unwrap_or(&self.configuration)
    }
}

/// How state moves across a reload, probed from the instance's command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransfer {
    Native { backup: bool, restore: bool, migrate: bool },
    ConfigurationOnly,
}

impl StateTransfer {
    pub fn probe(instance: &dyn PluginInstance) -> Self {
        let commands = instance.available_commands();
        let has = |name: &str| commands.iter().any(|c| c == name);
        let (backup, restore, migrate) = (
            has(BACKUP_STATE_COMMAND),
            has(RESTORE_STATE_COMMAND),
            has(MIGRATE_STATE_COMMAND),
        );
        if backup || restore || migrate {
            StateTransfer::Native { backup, restore, migrate }
        } else {
            StateTransfer::ConfigurationOnly
        }
    }

    pub fn supports_backup(&self) -> bool {
        matches!(self, StateTransfer::Native { backup: true, .. })
    }

    pub fn supports_restore(&self) -> bool {
        matches!(self, StateTransfer::Native { restore: true, .. })
    }

    pub fn supports_migrate(&self) -> bool {
        matches!(self, StateTransfer::Native { migrate: true, .. })
    }
}
