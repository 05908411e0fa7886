//! # Plugin manager
//!
//! [`PluginManager`] composes the [`Loader`], the [`PluginRegistry`], the
//! [`DependencyResolver`] and the [`LifecycleSupervisor`] into load, unload
//! and reload operations that either complete or leave the registry and the
//! dependency graph exactly as they were.
//!
//! Load pipeline: loader check, optional integrity check, `Loader::load`,
//! dependency pre-check, pre-load hooks, optional configure/initialize,
//! registry insert, graph rebuild, optional hot-reload watch, post-load
//! hooks, [`ManagerEvent::Loaded`]. Anything failing before the registry
//! insert hands the instance back to the loader.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};

use crate::config::{LifecycleConfig, RuntimeConfig};
use crate::lifecycle::{
    EventFilter, HealthStatus, LifecycleEvent, LifecycleEventBus, LifecycleState,
    LifecycleSupervisor, SubscriptionId,
};
use crate::lifecycle::supervisor::run_blocking;
use crate::plugin_system::dependency::{CircularDependency, DependencyResolver, ResolutionStrategy};
use crate::plugin_system::error::{ErrorKind, PluginSystemError, Result};
use crate::plugin_system::hooks::{HookContext, HookId, HookPoint, HookRegistry};
use crate::plugin_system::hot_reload::HotReloadManager;
use crate::plugin_system::integrity;
use crate::plugin_system::loader::Loader;
use crate::plugin_system::registry::{PluginInfoUpdate, PluginRecord, PluginRegistry};
use crate::plugin_system::traits::PluginInstance;
use crate::plugin_system::transaction::Transaction;

/// Per-load settings, remembered for reloads.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Hex SHA-256 the file must match before anything is loaded.
    pub expected_digest: Option<String>,
    /// Require declared dependencies to be loaded already.
    pub check_dependencies: bool,
    /// Drive the plugin to `Running` as part of the load.
    pub initialize: bool,
    /// Applied through `configure` before initialization.
    pub configuration: Option<Value>,
    /// Overrides the runtime's default lifecycle settings for this plugin.
    pub lifecycle: Option<LifecycleConfig>,
    pub hot_reload: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            expected_digest: None,
            check_dependencies: true,
            initialize: true,
            configuration: None,
            lifecycle: None,
            hot_reload: false,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn without_dependency_check(mut self) -> Self {
        self.check_dependencies = false;
        self
    }

    /// Load only; leave the plugin in `Loaded`.
    pub fn deferred(mut self) -> Self {
        self.initialize = false;
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_hot_reload(mut self) -> Self {
        self.hot_reload = true;
        self
    }
}

/// Notifications about registry membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    Loaded { plugin_id: String, path: PathBuf },
    Unloaded { plugin_id: String },
    Reloaded { plugin_id: String },
}

/// What happened to one item of a batch.
#[derive(Debug, Clone)]
pub enum BatchItemOutcome {
    Succeeded,
    /// The item whose failure aborted the batch.
    Failed(PluginSystemError),
    /// Completed, then undone when a later item failed.
    RolledBack,
    /// Never started because an earlier item failed.
    NotAttempted,
}

impl BatchItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemOutcome::Succeeded)
    }
}

/// Result of a batch operation, keyed by path (loads) or plugin id (unloads).
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub committed: bool,
    pub items: BTreeMap<String, BatchItemOutcome>,
}

impl BatchResult {
    /// The error that aborted the batch, if any.
    pub fn failure(&self) -> Option<(&str, &PluginSystemError)> {
        self.items.iter().find_map(|(key, outcome)| match outcome {
            BatchItemOutcome::Failed(e) => Some((key.as_str(), e)),
            _ => None,
        })
    }
}

struct ManagerInner {
    config: RuntimeConfig,
    loader: Arc<dyn Loader>,
    registry: PluginRegistry,
    resolver: RwLock<DependencyResolver>,
    // Held from a load's dependency check, or an unload's safety check,
    // until the graph reflects the change
    membership: Mutex<()>,
    supervisor: LifecycleSupervisor,
    hooks: HookRegistry,
    hot_reload: HotReloadManager,
    load_options: RwLock<HashMap<String, LoadOptions>>,
    events: broadcast::Sender<ManagerEvent>,
}

/// Orchestrates plugin loading, unloading and reloading.
///
/// Cheap to clone; clones share the same registry, graph and supervisor.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

impl PluginManager {
    pub fn new(loader: Arc<dyn Loader>, config: RuntimeConfig) -> Self {
        let bus = Arc::new(LifecycleEventBus::new(config.event_history_limit));
        let supervisor = LifecycleSupervisor::with_event_bus(config.lifecycle.clone(), bus);
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ManagerInner {
                registry: PluginRegistry::with_error_log_limit(config.max_error_log_entries),
                resolver: RwLock::new(DependencyResolver::new()),
                membership: Mutex::new(()),
                supervisor,
                hooks: HookRegistry::new(),
                hot_reload: HotReloadManager::new(config.hot_reload.clone()),
                load_options: RwLock::new(HashMap::new()),
                events,
                loader,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn supervisor(&self) -> &LifecycleSupervisor {
        &self.inner.supervisor
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn hot_reload(&self) -> &HotReloadManager {
        &self.inner.hot_reload
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    pub fn lifecycle_events(
        &self,
        filter: EventFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        self.inner.supervisor.subscribe(filter)
    }

    pub fn add_pre_load_hook<F>(&self, hook: F) -> HookId
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner.hooks.register(HookPoint::PreLoad, hook)
    }

    pub fn add_post_load_hook<F>(&self, hook: F) -> HookId
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner.hooks.register(HookPoint::PostLoad, hook)
    }

    pub fn add_pre_unload_hook<F>(&self, hook: F) -> HookId
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner.hooks.register(HookPoint::PreUnload, hook)
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.inner.hooks.remove(id)
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is not an error
        let _ = self.inner.events.send(event);
    }

    async fn rebuild_graph(&self) {
        // Snapshot under the graph's write lock so rebuilds apply in order
        let mut resolver = self.inner.resolver.write().await;
        let snapshot = self.inner.registry.snapshot().await;
        resolver.rebuild(&snapshot);
    }

    /// Loads the plugin at `path` and returns its id.
    pub async fn load(&self, path: impl AsRef<Path>, options: LoadOptions) -> Result<String> {
        let path = path.as_ref();
        let inner = &self.inner;

        if !inner.loader.can_load(path) {
            let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
            return Err(if exists {
                PluginSystemError::InvalidFormat {
                    path: path.to_path_buf(),
                    message: format!(
                        "no loader accepts this file (supported: {})",
                        inner.loader.supported_extensions().join(", ")
                    ),
                }
            } else {
                PluginSystemError::FileNotFound {
                    path: path.to_path_buf(),
                }
            });
        }

        if let Some(expected) = options.expected_digest.as_deref() {
            integrity::verify(path, expected).await?;
        }

        let instance = inner.loader.load(path).await?;
        let plugin_id = instance.id().to_string();
        let membership = inner.membership.lock().await;
        if let Err(e) = self.admit(path, instance, &options).await {
            // On an id clash the loader's entry belongs to the registered plugin
            if e.kind() != ErrorKind::AlreadyExists {
                if let Err(unload_err) = inner.loader.unload(&plugin_id).await {
                    warn!("Loader could not release rejected plugin '{}': {}", plugin_id, unload_err);
                }
            }
            warn!("Loading {} failed: {}", path.display(), e);
            return Err(e);
        }

        self.rebuild_graph().await;

        if options.hot_reload {
            if inner.hot_reload.is_enabled() {
                self.ensure_reload_dispatcher();
                if let Err(e) = inner.hot_reload.watch(&plugin_id, path) {
                    warn!("{}", e);
                }
            } else {
                debug!("Hot reload requested for '{}' but disabled by configuration", plugin_id);
            }
        }
        inner
            .load_options
            .write()
            .await
            .insert(plugin_id.clone(), options);
        drop(membership);

        inner.hooks.run_all(&HookContext {
            point: HookPoint::PostLoad,
            plugin_id: plugin_id.clone(),
            path: Some(path.to_path_buf()),
        });
        info!("Loaded plugin '{}' from {}", plugin_id, path.display());
        self.emit(ManagerEvent::Loaded {
            plugin_id: plugin_id.clone(),
            path: path.to_path_buf(),
        });
        Ok(plugin_id)
    }

    // Everything between Loader::load and Registry::register.
    async fn admit(
        &self,
        path: &Path,
        instance: Arc<dyn PluginInstance>,
        options: &LoadOptions,
    ) -> Result<()> {
        let inner = &self.inner;
        let plugin_id = instance.id().to_string();
        if inner.registry.contains(&plugin_id).await {
            return Err(PluginSystemError::AlreadyExists { plugin_id });
        }

        let record = PluginRecord::new(path, Arc::clone(&instance));
        if options.check_dependencies {
            inner
                .resolver
                .read()
                .await
                .check_dependencies_for(&plugin_id, &record.metadata)?;
        }

        inner.hooks.run(&HookContext {
            point: HookPoint::PreLoad,
            plugin_id: plugin_id.clone(),
            path: Some(path.to_path_buf()),
        })?;

        inner
            .supervisor
            .register(instance, options.lifecycle.clone())
            .await?;
        if let Err(e) = self.start_supervised(record, options).await {
            if let Err(shutdown_err) = inner.supervisor.shutdown(&plugin_id, true).await {
                debug!("Cleanup shutdown of '{}' failed: {}", plugin_id, shutdown_err);
            }
            if let Err(unregister_err) = inner.supervisor.unregister(&plugin_id).await {
                debug!("Cleanup of '{}' failed: {}", plugin_id, unregister_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn start_supervised(&self, mut record: PluginRecord, options: &LoadOptions) -> Result<()> {
        let supervisor = &self.inner.supervisor;
        let plugin_id = record.id.clone();

        if let Some(configuration) = &options.configuration {
            supervisor.configure(&plugin_id, configuration.clone()).await?;
            record.configuration = configuration.clone();
        }
        if options.initialize {
            supervisor.initialize_once(&plugin_id).await?;
        } else {
            supervisor.mark_loaded(&plugin_id).await?;
        }
        record.state = supervisor
            .state(&plugin_id)
            .await
            .unwrap_or(LifecycleState::Loaded);
        self.inner.registry.register(record).await
    }

    /// Unloads a plugin. Unless `force`d, refuses while other plugins depend on it.
    pub async fn unload(&self, plugin_id: &str, force: bool) -> Result<()> {
        let inner = &self.inner;
        let membership = inner.membership.lock().await;
        let record = inner
            .registry
            .get_info(plugin_id)
            .await
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;

        if !force {
            let resolver = inner.resolver.read().await;
            if !resolver.can_unload_safely(plugin_id) {
                let dependents = resolver.dependents_of(plugin_id);
                return Err(PluginSystemError::DependencyMissing {
                    plugin_id: plugin_id.to_string(),
                    dependency: None,
                    message: format!("still required by {}", dependents.join(", ")),
                });
            }
        }

        inner.hooks.run(&HookContext {
            point: HookPoint::PreUnload,
            plugin_id: plugin_id.to_string(),
            path: Some(record.path.clone()),
        })?;

        // Plugins that never reached Running are not shut down
        let state = inner.supervisor.state(plugin_id).await;
        if state.is_some_and(|s| s.is_active() || s == LifecycleState::Stopping) {
            if let Err(e) = inner.supervisor.shutdown(plugin_id, force).await {
                warn!("Shutdown of '{}' during unload reported: {}", plugin_id, e);
            }
        }
        inner.hot_reload.unwatch(plugin_id);

        inner.loader.unload(plugin_id).await.map_err(|e| match e {
            PluginSystemError::UnloadFailed { .. } => e,
            other => PluginSystemError::UnloadFailed {
                plugin_id: plugin_id.to_string(),
                message: other.to_string(),
            },
        })?;
        inner.registry.unregister(plugin_id).await?;
        if let Err(e) = inner.supervisor.unregister(plugin_id).await {
            debug!("Supervisor had no entry for '{}': {}", plugin_id, e);
        }
        inner.load_options.write().await.remove(plugin_id);
        self.rebuild_graph().await;
        drop(membership);

        info!("Unloaded plugin '{}'", plugin_id);
        self.emit(ManagerEvent::Unloaded {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// Replaces a plugin with a fresh load of the same file, carrying its state over.
    ///
    /// If the replacement fails to load, the error is returned and the plugin
    /// stays unloaded.
    pub async fn reload(&self, plugin_id: &str) -> Result<String> {
        let inner = &self.inner;
        let record = inner
            .registry
            .get_info(plugin_id)
            .await
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;
        let options = inner
            .load_options
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .unwrap_or_default();

        let backup = match inner.supervisor.backup_state(plugin_id).await {
            Ok(backup) => Some(backup),
            Err(e) => {
                warn!("Could not back up '{}' before reload: {}", plugin_id, e);
                None
            }
        };

        info!("Reloading plugin '{}' from {}", plugin_id, record.path.display());
        self.unload(plugin_id, true).await?;
        let new_id = self.load(&record.path, options).await.inspect_err(|e| {
            error!("Reload of '{}' failed, plugin stays unloaded: {}", plugin_id, e);
        })?;

        match backup {
            Some(backup) if backup.plugin_id == new_id => {
                let old_version = &record.metadata.version;
                let new_version = inner.registry.get_info(&new_id).await.map(|r| r.metadata.version);
                let restored = match new_version {
                    Some(version) if version != *old_version => {
                        inner
                            .supervisor
                            .migrate_state(&new_id, &backup, old_version, &version)
                            .await
                    }
                    _ => inner.supervisor.restore_state(&new_id, &backup).await,
                };
                match restored {
                    Ok(()) if !backup.configuration.is_null() => {
                        let update = PluginInfoUpdate::new().with_configuration(backup.configuration.clone());
                        if let Err(e) = inner.registry.update_info(&new_id, update).await {
                            debug!("Could not record restored configuration: {}", e);
                        }
                    }
                    Ok(()) => {}
                    Err(e) => warn!("State of '{}' was not restored after reload: {}", new_id, e),
                }
            }
            Some(_) => warn!(
                "Reloaded plugin reports id '{}' instead of '{}'; state not restored",
                new_id, plugin_id
            ),
            None => {}
        }

        self.emit(ManagerEvent::Reloaded {
            plugin_id: new_id.clone(),
        });
        Ok(new_id)
    }

    fn ensure_reload_dispatcher(&self) {
        let Some(mut receiver) = self.inner.hot_reload.take_receiver() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let debounce = self.inner.hot_reload.debounce();
        tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                // Coalesce a burst of change events into one reload per plugin
                let mut pending = BTreeSet::from([first]);
                tokio::time::sleep(debounce).await;
                while let Ok(more) = receiver.try_recv() {
                    pending.insert(more);
                }

                let Some(inner) = weak.upgrade() else { break };
                let manager = PluginManager { inner };
                for plugin_id in pending {
                    if !manager.is_loaded(&plugin_id).await {
                        continue;
                    }
                    match manager.reload(&plugin_id).await {
                        Ok(_) => info!("Hot reloaded plugin '{}'", plugin_id),
                        Err(e) => error!("Hot reload of '{}' failed: {}", plugin_id, e),
                    }
                }
            }
            debug!("Hot reload dispatcher stopped");
        });
    }

    /// Starts watching a loaded plugin's file.
    pub async fn enable_hot_reload(&self, plugin_id: &str) -> Result<()> {
        if !self.inner.hot_reload.is_enabled() {
            return Err(PluginSystemError::NotSupported {
                message: "hot reload is disabled in the runtime configuration".to_string(),
            });
        }
        let record = self
            .inner
            .registry
            .get_info(plugin_id)
            .await
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;
        self.ensure_reload_dispatcher();
        self.inner.hot_reload.watch(plugin_id, &record.path)?;
        if let Some(options) = self.inner.load_options.write().await.get_mut(plugin_id) {
            options.hot_reload = true;
        }
        Ok(())
    }

    pub async fn disable_hot_reload(&self, plugin_id: &str) -> bool {
        if let Some(options) = self.inner.load_options.write().await.get_mut(plugin_id) {
            options.hot_reload = false;
        }
        self.inner.hot_reload.unwatch(plugin_id)
    }

    async fn ensure_registered(&self, plugin_id: &str) -> Result<()> {
        if self.inner.registry.contains(plugin_id).await {
            Ok(())
        } else {
            Err(PluginSystemError::not_found(plugin_id))
        }
    }

    // Copies the supervisor's view of the plugin into its record.
    async fn sync_record(&self, plugin_id: &str, error: Option<&PluginSystemError>) {
        let mut update = PluginInfoUpdate::new().touched();
        if let Some(state) = self.inner.supervisor.state(plugin_id).await {
            update = update.with_state(state);
        }
        if let Some(e) = error {
            update = update.with_error(e.to_string());
        }
        if let Err(e) = self.inner.registry.update_info(plugin_id, update).await {
            debug!("Record of '{}' not updated: {}", plugin_id, e);
        }
    }

    pub async fn initialize(&self, plugin_id: &str) -> Result<()> {
        self.ensure_registered(plugin_id).await?;
        let result = self.inner.supervisor.initialize(plugin_id).await;
        self.sync_record(plugin_id, result.as_ref().err()).await;
        result
    }

    pub async fn shutdown(&self, plugin_id: &str, force: bool) -> Result<()> {
        self.ensure_registered(plugin_id).await?;
        let result = self.inner.supervisor.shutdown(plugin_id, force).await;
        self.sync_record(plugin_id, result.as_ref().err()).await;
        result
    }

    pub async fn pause(&self, plugin_id: &str) -> Result<()> {
        self.ensure_registered(plugin_id).await?;
        let result = self.inner.supervisor.pause(plugin_id).await;
        self.sync_record(plugin_id, result.as_ref().err()).await;
        result
    }

    pub async fn resume(&self, plugin_id: &str) -> Result<()> {
        self.ensure_registered(plugin_id).await?;
        let result = self.inner.supervisor.resume(plugin_id).await;
        self.sync_record(plugin_id, result.as_ref().err()).await;
        result
    }

    pub async fn configure(&self, plugin_id: &str, configuration: Value) -> Result<()> {
        self.ensure_registered(plugin_id).await?;
        let result = self
            .inner
            .supervisor
            .configure(plugin_id, configuration.clone())
            .await;
        if result.is_ok() {
            let update = PluginInfoUpdate::new().with_configuration(configuration);
            self.inner.registry.update_info(plugin_id, update).await?;
        }
        self.sync_record(plugin_id, result.as_ref().err()).await;
        result
    }

    /// Runs a command on a running plugin.
    pub async fn execute_command(&self, plugin_id: &str, command: &str, args: Value) -> Result<Value> {
        let instance = self
            .inner
            .registry
            .get(plugin_id)
            .await
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;
        let state = self.inner.supervisor.state(plugin_id).await;
        if state != Some(LifecycleState::Running) {
            return Err(PluginSystemError::invalid_state(
                plugin_id,
                format!(
                    "commands need a running plugin (current state: {})",
                    state.map_or("unknown", LifecycleState::as_str)
                ),
            ));
        }

        let name = command.to_string();
        let started = Instant::now();
        let result = run_blocking(plugin_id, &instance, move |p| p.execute_command(&name, &args)).await;

        let mut update = PluginInfoUpdate::new()
            .touched()
            .with_metric("last_command_ms", started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &result {
            update = update.with_error(format!("command '{}': {}", command, e));
        }
        if let Err(e) = self.inner.registry.update_info(plugin_id, update).await {
            debug!("Record of '{}' not updated: {}", plugin_id, e);
        }
        result
    }

    /// Loads every path in one transaction: all succeed or none stay loaded.
    ///
    /// A path listed twice fails the batch before anything is loaded.
    pub async fn batch_load(&self, paths: &[PathBuf], options: LoadOptions) -> BatchResult {
        let keys: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        let duplicate = {
            let mut seen = BTreeSet::new();
            keys.iter().find(|key| !seen.insert(key.as_str())).cloned()
        };
        if let Some(duplicate) = duplicate {
            warn!("Batch lists {} more than once", duplicate);
            let error = PluginSystemError::InvalidParameters {
                message: format!("{} is listed more than once", duplicate),
            };
            let items = keys
                .iter()
                .map(|key| {
                    let outcome = if *key == duplicate {
                        BatchItemOutcome::Failed(error.clone())
                    } else {
                        BatchItemOutcome::NotAttempted
                    };
                    (key.clone(), outcome)
                })
                .collect();
            return BatchResult {
                committed: false,
                items,
            };
        }

        let mut transaction = Transaction::new();
        for path in paths {
            let loaded_id: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));

            let forward = {
                let (manager, slot, path, options) =
                    (self.clone(), Arc::clone(&loaded_id), path.clone(), options.clone());
                move || async move {
                    let plugin_id = manager.load(&path, options).await?;
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(plugin_id);
                    Ok::<(), PluginSystemError>(())
                }
            };
            let compensate = {
                let manager = self.clone();
                move || async move {
                    let plugin_id = loaded_id.lock().unwrap_or_else(PoisonError::into_inner).take();
                    match plugin_id {
                        Some(plugin_id) => manager.unload(&plugin_id, true).await,
                        None => Ok(()),
                    }
                }
            };
            transaction.add_operation(format!("load {}", path.display()), forward, compensate);
        }

        Self::run_batch(transaction, keys).await
    }

    /// Unloads the given plugins, dependents first, in one transaction.
    ///
    /// Rolling back reloads already-unloaded plugins from their original paths.
    pub async fn batch_unload(&self, plugin_ids: &[String], force: bool) -> BatchResult {
        let mut ordered = self.inner.resolver.read().await.suggest_load_order(plugin_ids);
        ordered.reverse();
        for plugin_id in plugin_ids {
            if !ordered.contains(plugin_id) {
                ordered.push(plugin_id.clone());
            }
        }

        let mut transaction = Transaction::new();
        for plugin_id in &ordered {
            let restore = match self.inner.registry.get_info(plugin_id).await {
                Some(record) => {
                    let options = self
                        .inner
                        .load_options
                        .read()
                        .await
                        .get(plugin_id)
                        .cloned()
                        .unwrap_or_default();
                    Some((record.path, options))
                }
                None => None,
            };

            let forward = {
                let (manager, plugin_id) = (self.clone(), plugin_id.clone());
                move || async move { manager.unload(&plugin_id, force).await }
            };
            let compensate = {
                let manager = self.clone();
                move || async move {
                    match restore {
                        Some((path, options)) => manager.load(&path, options).await.map(|_| ()),
                        None => Ok(()),
                    }
                }
            };
            transaction.add_operation(format!("unload {}", plugin_id), forward, compensate);
        }

        Self::run_batch(transaction, ordered).await
    }

    async fn run_batch(mut transaction: Transaction, keys: Vec<String>) -> BatchResult {
        let outcome = transaction.commit().await;
        let mut items = BTreeMap::new();
        match outcome {
            Ok(()) => {
                for key in keys {
                    items.insert(key, BatchItemOutcome::Succeeded);
                }
            }
            Err(e) => {
                let failed_at = transaction.completed_operations();
                for (index, key) in keys.into_iter().enumerate() {
                    let outcome = if index < failed_at {
                        BatchItemOutcome::RolledBack
                    } else if index == failed_at {
                        BatchItemOutcome::Failed(e.clone())
                    } else {
                        BatchItemOutcome::NotAttempted
                    };
                    items.insert(key, outcome);
                }
            }
        }
        BatchResult {
            committed: transaction.is_committed(),
            items,
        }
    }

    /// Shuts every plugin down against one deadline (the configured default if `None`).
    pub async fn shutdown_all(&self, deadline: Option<Duration>) -> Result<()> {
        let deadline = deadline.unwrap_or(self.inner.config.shutdown_deadline);
        let result = self.inner.supervisor.shutdown_all_gracefully(deadline).await;
        for plugin_id in self.inner.registry.ids().await {
            self.sync_record(&plugin_id, None).await;
        }
        result
    }

    /// Copy of a plugin's record, with the supervisor's current state.
    pub async fn get_info(&self, plugin_id: &str) -> Option<PluginRecord> {
        let mut record = self.inner.registry.get_info(plugin_id).await?;
        if let Some(state) = self.inner.supervisor.state(plugin_id).await {
            record.state = state;
        }
        Some(record)
    }

    pub async fn get_all(&self) -> Vec<PluginRecord> {
        let mut records = self.inner.registry.get_all().await;
        for record in &mut records {
            if let Some(state) = self.inner.supervisor.state(&record.id).await {
                record.state = state;
            }
        }
        records
    }

    pub async fn get_instance(&self, plugin_id: &str) -> Option<Arc<dyn PluginInstance>> {
        self.inner.registry.get(plugin_id).await
    }

    pub async fn is_loaded(&self, plugin_id: &str) -> bool {
        self.inner.registry.contains(plugin_id).await
    }

    pub async fn loaded_ids(&self) -> Vec<String> {
        self.inner.registry.ids().await
    }

    pub async fn state(&self, plugin_id: &str) -> Option<LifecycleState> {
        self.inner.supervisor.state(plugin_id).await
    }

    pub async fn check_health(&self, plugin_id: &str) -> Result<HealthStatus> {
        self.inner.supervisor.check_health(plugin_id).await
    }

    pub async fn health_status(&self, plugin_id: &str) -> Option<HealthStatus> {
        self.inner.supervisor.health_status(plugin_id).await
    }

    /// Dependencies-first load order; empty when the graph has a cycle.
    pub async fn get_load_order(&self) -> Vec<String> {
        self.inner.resolver.read().await.topological_sort()
    }

    pub async fn try_get_load_order(&self) -> Result<Vec<String>> {
        self.inner.resolver.read().await.try_topological_sort()
    }

    pub async fn dependencies_of(&self, plugin_id: &str) -> Vec<String> {
        self.inner.resolver.read().await.dependencies_of(plugin_id)
    }

    pub async fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        self.inner.resolver.read().await.dependents_of(plugin_id)
    }

    pub async fn can_unload_safely(&self, plugin_id: &str) -> bool {
        self.inner.resolver.read().await.can_unload_safely(plugin_id)
    }

    pub async fn has_circular_dependencies(&self) -> bool {
        self.inner.resolver.read().await.has_circular_dependencies()
    }

    pub async fn get_circular_dependencies(&self) -> Vec<CircularDependency> {
        self.inner.resolver.read().await.get_circular_dependencies()
    }

    /// Breaks cycles in the derived graph. The next load or unload rebuilds it
    /// from declared metadata again.
    pub async fn resolve_circular_dependencies(&self, strategy: ResolutionStrategy) -> Result<usize> {
        self.inner
            .resolver
            .write()
            .await
            .resolve_circular_dependencies(strategy)
    }

    pub async fn validate_dependencies(&self) -> Result<()> {
        self.inner.resolver.read().await.validate_dependencies()
    }
}
