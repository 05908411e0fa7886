use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::constants::ERROR_LOG_LIMIT;
use crate::lifecycle::LifecycleState;
use crate::plugin_system::error::{PluginSystemError, Result};
use crate::plugin_system::metadata::PluginMetadata;
use crate::plugin_system::traits::PluginInstance;

/// Everything the registry knows about one loaded plugin.
///
/// Values handed out by [`PluginRegistry`] are copies; only the instance
/// handle is shared.
#[derive(Clone)]
pub struct PluginRecord {
    pub id: String,
    pub path: PathBuf,
    pub metadata: PluginMetadata,
    pub state: LifecycleState,
    pub loaded_at: SystemTime,
    pub last_activity: SystemTime,
    pub configuration: Value,
    pub error_log: VecDeque<String>,
    pub metrics: HashMap<String, f64>,
    pub instance: Arc<dyn PluginInstance>,
}

impl PluginRecord {
    pub fn new(path: impl AsRef<Path>, instance: Arc<dyn PluginInstance>) -> Self {
        let now = SystemTime::now();
        Self {
            id: instance.id().to_string(),
            path: path.as_ref().to_path_buf(),
            metadata: instance.metadata().clone(),
            state: LifecycleState::Loaded,
            loaded_at: now,
            last_activity: now,
            configuration: Value::Null,
            error_log: VecDeque::new(),
            metrics: HashMap::new(),
            instance,
        }
    }
}

impl fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRecord")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("version", &self.metadata.version.to_string())
            .field("state", &self.state)
            .field("errors", &self.error_log.len())
            .finish_non_exhaustive()
    }
}

/// Partial update of a record's mutable fields.
#[derive(Debug, Clone, Default)]
pub struct PluginInfoUpdate {
    pub state: Option<LifecycleState>,
    pub last_activity: Option<SystemTime>,
    pub configuration: Option<Value>,
    /// Appended to the error log.
    pub errors: Vec<String>,
    /// Merged into the metrics map.
    pub metrics: HashMap<String, f64>,
}

impl PluginInfoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    /// Marks the record as active now.
    pub fn touched(mut self) -> Self {
        self.last_activity = Some(SystemTime::now());
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Registry for managing loaded plugins
pub struct PluginRegistry {
    records: RwLock<HashMap<String, PluginRecord>>,
    error_log_limit: usize,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::with_error_log_limit(ERROR_LOG_LIMIT)
    }

    pub fn with_error_log_limit(error_log_limit: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            error_log_limit: error_log_limit.max(1),
        }
    }

    /// Adds a record. Fails with `AlreadyExists` if the id is taken.
    pub async fn register(&self, record: PluginRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(PluginSystemError::AlreadyExists {
                plugin_id: record.id.clone(),
            });
        }
        debug!("Registry: added '{}' from {}", record.id, record.path.display());
        records.insert(record.id.clone(), record);
        Ok(())
    }

    pub async fn unregister(&self, plugin_id: &str) -> Result<PluginRecord> {
        let removed = self.records.write().await.remove(plugin_id);
        match removed {
            Some(record) => {
                debug!("Registry: removed '{}'", plugin_id);
                Ok(record)
            }
            None => Err(PluginSystemError::not_found(plugin_id)),
        }
    }

    /// Shared handle to the running instance.
    pub async fn get(&self, plugin_id: &str) -> Option<Arc<dyn PluginInstance>> {
        self.records
            .read()
            .await
            .get(plugin_id)
            .map(|r| Arc::clone(&r.instance))
    }

    pub async fn get_info(&self, plugin_id: &str) -> Option<PluginRecord> {
        self.records.read().await.get(plugin_id).cloned()
    }

    /// Copies of every record, ordered by id.
    pub async fn get_all(&self) -> Vec<PluginRecord> {
        let mut all: Vec<PluginRecord> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.records.read().await.contains_key(plugin_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Removes every record and returns how many there were.
    pub async fn clear(&self) -> usize {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        count
    }

    /// Merges the mutable fields of `update` into the record.
    pub async fn update_info(&self, plugin_id: &str, update: PluginInfoUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;

        if let Some(state) = update.state {
            record.state = state;
        }
        if let Some(last_activity) = update.last_activity {
            record.last_activity = last_activity;
        }
        if let Some(configuration) = update.configuration {
            record.configuration = configuration;
        }
        for error in update.errors {
            record.error_log.push_back(error);
        }
        while record.error_log.len() > self.error_log_limit {
            record.error_log.pop_front();
        }
        record.metrics.extend(update.metrics);
        Ok(())
    }

    /// Id → metadata view the dependency resolver rebuilds from.
    pub async fn snapshot(&self) -> BTreeMap<String, PluginMetadata> {
        self.records
            .read()
            .await
            .values()
            .map(|r| (r.id.clone(), r.metadata.clone()))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
