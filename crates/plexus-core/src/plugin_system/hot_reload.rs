//! File watching for hot reload.
//!
//! One `notify` watcher per watched plugin file. Change notifications are
//! forwarded as plugin ids over a channel; the [`PluginManager`] drains it,
//! coalesces bursts within the debounce window and reloads each plugin once.
//!
//! [`PluginManager`]: crate::plugin_system::PluginManager
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::HotReloadConfig;
use crate::plugin_system::error::{PluginSystemError, Result};

pub struct HotReloadManager {
    config: HotReloadConfig,
    watchers: Mutex<HashMap<String, RecommendedWatcher>>,
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl HotReloadManager {
    pub fn new(config: HotReloadConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            watchers: Mutex::new(HashMap::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn debounce(&self) -> Duration {
        self.config.debounce
    }

    /// Starts watching `path` on behalf of `plugin_id`, replacing any earlier watch.
    pub fn watch(&self, plugin_id: &str, path: &Path) -> Result<()> {
        let sender = self.sender.clone();
        let id = plugin_id.to_string();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    // The receiver only disappears when the manager is gone
                    let _ = sender.send(id.clone());
                }
                Ok(_) => {}
                Err(e) => warn!("File watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| PluginSystemError::ExecutionFailed {
            plugin_id: Some(plugin_id.to_string()),
            message: format!("failed to create file watcher: {}", e),
        })?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| PluginSystemError::ExecutionFailed {
                plugin_id: Some(plugin_id.to_string()),
                message: format!("failed to watch {}: {}", path.display(), e),
            })?;

        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plugin_id.to_string(), watcher);
        info!("Hot reload enabled for '{}' ({})", plugin_id, path.display());
        Ok(())
    }

    /// Stops watching. Returns false if the plugin was not watched.
    pub fn unwatch(&self, plugin_id: &str) -> bool {
        let removed = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plugin_id)
            .is_some();
        if removed {
            debug!("Hot reload disabled for '{}'", plugin_id);
        }
        removed
    }

    pub fn is_watching(&self, plugin_id: &str) -> bool {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(plugin_id)
    }

    pub fn watched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Queues a reload of `plugin_id` as if its file had changed.
    pub fn request_reload(&self, plugin_id: &str) -> bool {
        self.sender.send(plugin_id.to_string()).is_ok()
    }

    /// Hands the change channel to its single consumer.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
