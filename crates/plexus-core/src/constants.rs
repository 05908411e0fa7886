//! Runtime-wide limits and defaults.

use std::time::Duration;

/// Maximum number of lifecycle events retained by the event bus.
pub const EVENT_HISTORY_LIMIT: usize = 1000;

/// Number of recent lifecycle events copied into a state backup.
pub const BACKUP_EVENT_LIMIT: usize = 10;

/// Consecutive failed health checks before auto-restart is considered.
pub const HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Maximum entries kept in a plugin record's error log.
pub const ERROR_LOG_LIMIT: usize = 100;

pub const DEFAULT_INITIALIZATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
pub const DEFAULT_HOT_RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Native state-transfer command names probed on plugin instances.
pub const BACKUP_STATE_COMMAND: &str = "backup_state";
pub const RESTORE_STATE_COMMAND: &str = "restore_state";
pub const MIGRATE_STATE_COMMAND: &str = "migrate_state";

/// Symbol exported by dynamic-library plugins.
pub const PLUGIN_CREATE_SYMBOL: &[u8] = b"_plexus_plugin_create\0";

/// File suffix recognised by the manifest loader.
pub const MANIFEST_SUFFIX: &str = ".plugin.json";
