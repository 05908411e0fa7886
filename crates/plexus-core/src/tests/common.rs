#![cfg(test)]
// crates/plexus-core/src/tests/common.rs
//
// Mock plugins and a mock loader shared by the unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use serde_json::{Value, json};

use crate::config::{LifecycleConfig, RuntimeConfig};
use crate::constants::{BACKUP_STATE_COMMAND, MIGRATE_STATE_COMMAND, RESTORE_STATE_COMMAND};
use crate::lifecycle::LifecycleState;
use crate::plugin_system::error::{PluginSystemError, Result};
use crate::plugin_system::loader::Loader;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::metadata::{PluginDependency, PluginMetadata};
use crate::plugin_system::traits::{PluginError, PluginInstance, PluginPriority};
use crate::plugin_system::version::VersionRange;

/// How `initialize` behaves.
#[derive(Debug, Clone)]
pub enum InitBehaviour {
    Succeed,
    Fail(String),
    /// Blocks for the given time, then succeeds.
    Delay(Duration),
    /// Fails the first `n` calls, then succeeds.
    FailTimes(usize),
    Panic,
}

/// Call counters, shared with the test after the plugin moves into a loader.
#[derive(Debug, Default)]
pub struct Counters {
    pub init: AtomicUsize,
    pub shutdown: AtomicUsize,
    pub configure: AtomicUsize,
    pub commands: AtomicUsize,
}

impl Counters {
    pub fn init_calls(&self) -> usize {
        self.init.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn configure_calls(&self) -> usize {
        self.configure.load(Ordering::SeqCst)
    }
}

pub struct MockPlugin {
    id: String,
    metadata: PluginMetadata,
    init: InitBehaviour,
    shutdown_delay: Duration,
    shutdown_fails: bool,
    state_commands: bool,
    state: Mutex<LifecycleState>,
    stored: Mutex<Value>,
    configuration: Mutex<Value>,
    counters: Arc<Counters>,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockPlugin {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            metadata: PluginMetadata::new(id, Version::new(1, 0, 0)),
            init: InitBehaviour::Succeed,
            shutdown_delay: Duration::ZERO,
            shutdown_fails: false,
            state_commands: false,
            state: Mutex::new(LifecycleState::Loaded),
            stored: Mutex::new(Value::Null),
            configuration: Mutex::new(Value::Null),
            counters: Arc::new(Counters::default()),
            order: None,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.metadata.version = Version::parse(version).unwrap();
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.metadata.dependencies.push(PluginDependency::any(id));
        self
    }

    pub fn depends_on_range(mut self, id: &str, constraint: &str) -> Self {
        let range = VersionRange::from_constraint(constraint).unwrap();
        self.metadata
            .dependencies
            .push(PluginDependency::with_range(id, range));
        self
    }

    pub fn with_priority(mut self, priority: PluginPriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_init(mut self, init: InitBehaviour) -> Self {
        self.init = init;
        self
    }

    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn with_failing_shutdown(mut self) -> Self {
        self.shutdown_fails = true;
        self
    }

    /// Adds `backup_state`, `restore_state` and `migrate_state`.
    pub fn with_state_commands(mut self) -> Self {
        self.state_commands = true;
        self
    }

    pub fn with_order(mut self, order: Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn stored(&self) -> Value {
        self.stored.lock().unwrap().clone()
    }

    pub fn set_stored(&self, value: Value) {
        *self.stored.lock().unwrap() = value;
    }

    pub fn configuration(&self) -> Value {
        self.configuration.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<dyn PluginInstance> {
        Arc::new(self)
    }

    fn record(&self, what: &str) {
        if let Some(order) = &self.order {
            order.lock().unwrap().push(format!("{}:{}", what, self.id));
        }
    }
}

impl PluginInstance for MockPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn initialize(&self) -> std::result::Result<(), PluginError> {
        let calls = self.counters.init.fetch_add(1, Ordering::SeqCst) + 1;
        self.record("init");
        match &self.init {
            InitBehaviour::Succeed => {}
            InitBehaviour::Fail(message) => return Err(PluginError::InitError(message.clone())),
            InitBehaviour::Delay(delay) => std::thread::sleep(*delay),
            InitBehaviour::FailTimes(n) if calls <= *n => {
                return Err(PluginError::InitError(format!("attempt {} fails", calls)));
            }
            InitBehaviour::FailTimes(_) => {}
            InitBehaviour::Panic => panic!("mock plugin '{}' panicked in initialize", self.id),
        }
        *self.state.lock().unwrap() = LifecycleState::Running;
        Ok(())
    }

    fn shutdown(&self) -> std::result::Result<(), PluginError> {
        if !self.shutdown_delay.is_zero() {
            std::thread::sleep(self.shutdown_delay);
        }
        self.counters.shutdown.fetch_add(1, Ordering::SeqCst);
        self.record("shutdown");
        *self.state.lock().unwrap() = LifecycleState::Stopped;
        if self.shutdown_fails {
            return Err(PluginError::ShutdownError("mock shutdown failure".to_string()));
        }
        Ok(())
    }

    fn configure(&self, config: &Value) -> std::result::Result<(), PluginError> {
        self.counters.configure.fetch_add(1, Ordering::SeqCst);
        if config.get("reject").is_some() {
            return Err(PluginError::ConfigError("rejected by mock".to_string()));
        }
        *self.configuration.lock().unwrap() = config.clone();
        Ok(())
    }

    fn execute_command(&self, name: &str, args: &Value) -> std::result::Result<Value, PluginError> {
        self.counters.commands.fetch_add(1, Ordering::SeqCst);
        match name {
            "ping" => Ok(json!("pong")),
            "fail" => Err(PluginError::ExecutionError("mock command failure".to_string())),
            BACKUP_STATE_COMMAND if self.state_commands => Ok(json!({ "value": self.stored() })),
            RESTORE_STATE_COMMAND if self.state_commands => {
                self.set_stored(args.get("value").cloned().unwrap_or(Value::Null));
                Ok(Value::Null)
            }
            MIGRATE_STATE_COMMAND if self.state_commands => {
                self.set_stored(json!({
                    "migrated_from": args["from_version"],
                    "value": args["state"]["value"],
                }));
                Ok(Value::Null)
            }
            other => Err(PluginError::UnknownCommand(other.to_string())),
        }
    }

    fn available_commands(&self) -> Vec<String> {
        let mut commands = vec!["ping".to_string(), "fail".to_string()];
        if self.state_commands {
            commands.extend(
                [BACKUP_STATE_COMMAND, RESTORE_STATE_COMMAND, MIGRATE_STATE_COMMAND]
                    .iter()
                    .map(|c| c.to_string()),
            );
        }
        commands
    }
}

/// Serves pre-registered instances for `*.mock` paths.
#[derive(Default)]
pub struct MockLoader {
    plugins: Mutex<HashMap<PathBuf, Arc<dyn PluginInstance>>>,
    loaded: Mutex<HashSet<String>>,
    pub unload_calls: AtomicUsize,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `plugin` the instance served for `path`, replacing any earlier one.
    pub fn insert(&self, path: impl AsRef<Path>, plugin: Arc<dyn PluginInstance>) {
        self.plugins
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), plugin);
    }

    pub fn is_held(&self, plugin_id: &str) -> bool {
        self.loaded.lock().unwrap().contains(plugin_id)
    }

    pub fn unloads(&self) -> usize {
        self.unload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for MockLoader {
    fn can_load(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "mock")
    }

    async fn load(&self, path: &Path) -> Result<Arc<dyn PluginInstance>> {
        let plugin = self
            .plugins
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PluginSystemError::FileNotFound {
                path: path.to_path_buf(),
            })?;
        if !self.loaded.lock().unwrap().insert(plugin.id().to_string()) {
            return Err(PluginSystemError::AlreadyExists {
                plugin_id: plugin.id().to_string(),
            });
        }
        Ok(plugin)
    }

    async fn unload(&self, plugin_id: &str) -> Result<()> {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        if self.loaded.lock().unwrap().remove(plugin_id) {
            Ok(())
        } else {
            Err(PluginSystemError::not_found(plugin_id))
        }
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["mock".to_string()]
    }
}

pub fn mock_path(id: &str) -> PathBuf {
    PathBuf::from(format!("/virtual/{}.mock", id))
}

/// Lifecycle settings with short timeouts, for tests that exercise them.
pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        initialization_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_millis(200),
        ..LifecycleConfig::default()
    }
}

/// A manager over a fresh [`MockLoader`].
pub fn mock_manager() -> (PluginManager, Arc<MockLoader>) {
    mock_manager_with(RuntimeConfig::default())
}

pub fn mock_manager_with(config: RuntimeConfig) -> (PluginManager, Arc<MockLoader>) {
    let loader = MockLoader::new();
    let manager = PluginManager::new(loader.clone(), config);
    (manager, loader)
}

/// Registers `plugin` with `loader` under its mock path and returns that path.
pub fn stage(loader: &MockLoader, plugin: MockPlugin) -> PathBuf {
    let path = mock_path(plugin.id());
    loader.insert(&path, plugin.into_arc());
    path
}
