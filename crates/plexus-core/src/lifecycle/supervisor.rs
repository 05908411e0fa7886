//! # Lifecycle supervisor
//!
//! Owns one [`PluginStateMachine`] per registered plugin and drives it through
//! initialization and shutdown, applying the timeouts from
//! [`LifecycleConfig`]. Instance calls run on tokio's blocking pool; timeouts
//! only stop the supervisor from waiting, the in-flight call is never
//! interrupted.
//!
//! Health monitoring is a periodic task per plugin that evaluates a
//! [`HealthPredicate`]. After [`HEALTH_FAILURE_THRESHOLD`] consecutive
//! failures, and if auto-restart is enabled, the plugin is restarted at most
//! once per cooldown window and never more than `max_restart_attempts` times
//! in a row.
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use semver::Version;
use serde_json::{Value, json};
use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::config::LifecycleConfig;
use crate::constants::{
    BACKUP_EVENT_LIMIT, BACKUP_STATE_COMMAND, HEALTH_FAILURE_THRESHOLD, MIGRATE_STATE_COMMAND,
    RESTORE_STATE_COMMAND,
};
use crate::lifecycle::backup::{StateBackup, StateTransfer};
use crate::lifecycle::events::{
    EventFilter, LifecycleEvent, LifecycleEventBus, LifecycleEventKind, SubscriptionId,
};
use crate::lifecycle::health::{HealthPredicate, HealthStatus, RestartTracker, default_health_predicate};
use crate::lifecycle::machine::PluginStateMachine;
use crate::lifecycle::state::LifecycleState;
use crate::plugin_system::error::{ErrorKind, PluginSystemError, Result};
use crate::plugin_system::traits::{PluginError, PluginInstance};

/// Runs a plugin call on the blocking pool and converts its outcome.
pub(crate) async fn run_blocking<T, F>(
    plugin_id: &str,
    instance: &Arc<dyn PluginInstance>,
    call: F,
) -> Result<T>
where
    F: FnOnce(&dyn PluginInstance) -> std::result::Result<T, PluginError> + Send + 'static,
    T: Send + 'static,
{
    let instance = Arc::clone(instance);
    let joined = tokio::task::spawn_blocking(move || call(instance.as_ref())).await;
    join_instance_call(plugin_id, joined)
}

fn join_instance_call<T>(
    plugin_id: &str,
    joined: std::result::Result<std::result::Result<T, PluginError>, JoinError>,
) -> Result<T> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PluginSystemError::from_plugin_error(plugin_id, e)),
        Err(join_error) if join_error.is_panic() => Err(PluginSystemError::execution_failed(
            plugin_id,
            "plugin panicked during the call",
        )),
        Err(_) => Err(PluginSystemError::execution_failed(plugin_id, "plugin call was cancelled")),
    }
}

fn drive(machine: &PluginStateMachine, steps: &[LifecycleState]) -> Result<()> {
    for step in steps {
        machine.transition_to(*step)?;
    }
    Ok(())
}

// A concurrent forced shutdown may already have reached Stopped.
fn finish_stop(machine: &PluginStateMachine) -> Result<()> {
    match machine.transition_to(LifecycleState::Stopped) {
        Ok(_) => Ok(()),
        Err(_) if machine.state() == LifecycleState::Stopped => Ok(()),
        Err(e) => Err(e),
    }
}

struct ManagedPlugin {
    instance: Arc<dyn PluginInstance>,
    machine: Arc<PluginStateMachine>,
    config: LifecycleConfig,
    configuration: Mutex<Value>,
    restart: Mutex<RestartTracker>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ManagedPlugin {
    fn stop_health_task(&self) {
        if let Some(task) = self
            .health_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for ManagedPlugin {
    fn drop(&mut self) {
        self.stop_health_task();
    }
}

struct SupervisorInner {
    plugins: RwLock<HashMap<String, Arc<ManagedPlugin>>>,
    health: RwLock<HashMap<String, HealthStatus>>,
    events: Arc<LifecycleEventBus>,
    predicate: StdRwLock<HealthPredicate>,
    default_config: LifecycleConfig,
    workers: Arc<Semaphore>,
}

/// Supervises the lifecycle of every registered plugin.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LifecycleSupervisor {
    inner: Arc<SupervisorInner>,
}

impl LifecycleSupervisor {
    pub fn new(default_config: LifecycleConfig) -> Self {
        Self::with_event_bus(default_config, Arc::new(LifecycleEventBus::default()))
    }

    pub fn with_event_bus(default_config: LifecycleConfig, events: Arc<LifecycleEventBus>) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            inner: Arc::new(SupervisorInner {
                plugins: RwLock::new(HashMap::new()),
                health: RwLock::new(HashMap::new()),
                events,
                predicate: StdRwLock::new(default_health_predicate()),
                default_config,
                workers: Arc::new(Semaphore::new(workers)),
            }),
        }
    }

    pub fn event_bus(&self) -> &Arc<LifecycleEventBus> {
        &self.inner.events
    }

    pub fn default_config(&self) -> &LifecycleConfig {
        &self.inner.default_config
    }

    /// Replaces the predicate used by every subsequent health check.
    pub fn set_health_predicate(&self, predicate: HealthPredicate) {
        *self.inner.predicate.write().unwrap_or_else(PoisonError::into_inner) = predicate;
    }

    fn predicate(&self) -> HealthPredicate {
        Arc::clone(&self.inner.predicate.read().unwrap_or_else(PoisonError::into_inner))
    }

    async fn managed(&self, plugin_id: &str) -> Result<Arc<ManagedPlugin>> {
        self.inner
            .plugins
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))
    }

    /// Starts supervising `instance`. Its machine begins in `Unloaded`.
    pub async fn register(
        &self,
        instance: Arc<dyn PluginInstance>,
        config: Option<LifecycleConfig>,
    ) -> Result<()> {
        let plugin_id = instance.id().to_string();
        let config = config.unwrap_or_else(|| self.inner.default_config.clone());
        let machine = Arc::new(PluginStateMachine::with_event_bus(
            &plugin_id,
            Arc::clone(&self.inner.events),
        ));
        let managed = Arc::new(ManagedPlugin {
            instance,
            machine,
            config: config.clone(),
            configuration: Mutex::new(Value::Null),
            restart: Mutex::new(RestartTracker::default()),
            health_task: Mutex::new(None),
        });

        {
            let mut plugins = self.inner.plugins.write().await;
            if plugins.contains_key(&plugin_id) {
                return Err(PluginSystemError::AlreadyExists { plugin_id });
            }
            plugins.insert(plugin_id.clone(), Arc::clone(&managed));
        }
        self.inner
            .health
            .write()
            .await
            .insert(plugin_id.clone(), HealthStatus::new(&plugin_id));

        if config.enable_health_monitoring {
            self.start_health_monitoring(&managed, plugin_id.clone(), config.health_check_interval);
        }
        info!("Supervising plugin '{}'", plugin_id);
        Ok(())
    }

    /// Stops supervising a plugin. Its state machine is dropped as-is.
    pub async fn unregister(&self, plugin_id: &str) -> Result<()> {
        let managed = self
            .inner
            .plugins
            .write()
            .await
            .remove(plugin_id)
            .ok_or_else(|| PluginSystemError::not_found(plugin_id))?;
        managed.stop_health_task();
        self.inner.health.write().await.remove(plugin_id);
        debug!("Stopped supervising plugin '{}'", plugin_id);
        Ok(())
    }

    fn start_health_monitoring(&self, managed: &ManagedPlugin, plugin_id: String, interval: Duration) {
        let weak: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        // tokio::time::interval rejects a zero period
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let supervisor = LifecycleSupervisor { inner };
                match supervisor.check_health(&plugin_id).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => break,
                    Err(e) => debug!("Health check for '{}' failed to run: {}", plugin_id, e),
                }
            }
        });
        *managed.health_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Moves a freshly registered (or stopped) plugin to `Loaded` without initializing it.
    pub async fn mark_loaded(&self, plugin_id: &str) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        match managed.machine.state() {
            LifecycleState::Loaded => Ok(()),
            LifecycleState::Unloaded => {
                drive(&managed.machine, &[LifecycleState::Loading, LifecycleState::Loaded])
            }
            LifecycleState::Stopped => drive(
                &managed.machine,
                &[LifecycleState::Unloaded, LifecycleState::Loading, LifecycleState::Loaded],
            ),
            other => Err(PluginSystemError::invalid_state(
                plugin_id,
                format!("cannot mark loaded from state {}", other),
            )),
        }
    }

    /// Drives the plugin to `Running`. With auto-restart on, a failure
    /// schedules a restart evaluation.
    pub async fn initialize(&self, plugin_id: &str) -> Result<()> {
        self.initialize_with(plugin_id, true).await
    }

    /// Like [`initialize`](Self::initialize), but a failure is only reported.
    ///
    /// Used while the plugin's admission is still undecided, so that no
    /// restart can outlive a rejected load.
    pub(crate) async fn initialize_once(&self, plugin_id: &str) -> Result<()> {
        self.initialize_with(plugin_id, false).await
    }

    async fn initialize_with(&self, plugin_id: &str, allow_restart: bool) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        let machine = &managed.machine;
        match machine.state() {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Loaded => {}
            LifecycleState::Unloaded => {
                drive(machine, &[LifecycleState::Loading, LifecycleState::Loaded])?
            }
            LifecycleState::Stopped => drive(
                machine,
                &[LifecycleState::Unloaded, LifecycleState::Loading, LifecycleState::Loaded],
            )?,
            LifecycleState::Error => {
                drive(machine, &[LifecycleState::Reloading, LifecycleState::Loaded])?
            }
            other => {
                return Err(PluginSystemError::invalid_state(
                    plugin_id,
                    format!("cannot initialize from state {}", other),
                ));
            }
        }
        machine.transition_to(LifecycleState::Initializing)?;
        info!("Initializing plugin '{}'", plugin_id);

        let timeout = managed.config.initialization_timeout;
        let instance = Arc::clone(&managed.instance);
        let call = tokio::task::spawn_blocking(move || instance.initialize());
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(joined) => join_instance_call(plugin_id, joined),
            Err(_) => {
                // The call keeps running on the blocking pool; only the wait ends here
                machine.force_error("initialization timed out");
                machine.notify(
                    LifecycleEventKind::InitializationTimeout,
                    format!("no response within {:?}", timeout),
                );
                return Err(PluginSystemError::OperationCancelled {
                    plugin_id: plugin_id.to_string(),
                    operation: "initialize".to_string(),
                    message: format!("timed out after {:?}", timeout),
                });
            }
        };

        match outcome {
            Ok(()) => {
                machine.transition_to(LifecycleState::Running)?;
                info!("Plugin '{}' is running", plugin_id);
                Ok(())
            }
            Err(e) => {
                error!("Plugin '{}' failed to initialize: {}", plugin_id, e);
                if machine.transition_to(LifecycleState::Error).is_err() {
                    machine.force_error(&e.to_string());
                }
                machine.notify(LifecycleEventKind::Error, e.to_string());
                if allow_restart && managed.config.auto_restart {
                    self.schedule_restart_evaluation(plugin_id.to_string(), Arc::clone(&managed));
                }
                Err(e)
            }
        }
    }

    /// Stops the plugin. `Stopped` and `Unloaded` are no-ops.
    ///
    /// A forced shutdown skips the graceful timeout, takes over a shutdown
    /// already in progress, and from any other state calls the plugin's
    /// `shutdown` and resets the machine to `Unloaded`.
    pub async fn shutdown(&self, plugin_id: &str, force: bool) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        let machine = &managed.machine;
        match machine.state() {
            LifecycleState::Stopped | LifecycleState::Unloaded => return Ok(()),
            LifecycleState::Running | LifecycleState::Paused => {
                machine.transition_to(LifecycleState::Stopping)?;
            }
            LifecycleState::Stopping if force => {}
            other if force => {
                warn!("Force shutting down plugin '{}' from state {}", plugin_id, other);
                if let Err(e) = run_blocking(plugin_id, &managed.instance, |p| p.shutdown()).await {
                    warn!("Plugin '{}' failed during forced shutdown: {}", plugin_id, e);
                }
                machine.reset();
                return Ok(());
            }
            other => {
                return Err(PluginSystemError::invalid_state(
                    plugin_id,
                    format!("cannot shut down from state {}", other),
                ));
            }
        }

        info!("Shutting down plugin '{}'{}", plugin_id, if force { " (forced)" } else { "" });
        let config = &managed.config;
        let result = if !force && config.graceful_shutdown {
            let instance = Arc::clone(&managed.instance);
            let call = tokio::task::spawn_blocking(move || instance.shutdown());
            match tokio::time::timeout(config.shutdown_timeout, call).await {
                Ok(joined) => join_instance_call(plugin_id, joined),
                Err(_) => {
                    warn!(
                        "Plugin '{}' did not shut down within {:?}, calling shutdown again",
                        plugin_id, config.shutdown_timeout
                    );
                    machine.notify(
                        LifecycleEventKind::ShutdownTimeout,
                        format!("no response within {:?}", config.shutdown_timeout),
                    );
                    run_blocking(plugin_id, &managed.instance, |p| p.shutdown()).await
                }
            }
        } else {
            run_blocking(plugin_id, &managed.instance, |p| p.shutdown()).await
        };

        finish_stop(machine)?;
        match result {
            Ok(()) => {
                info!("Plugin '{}' stopped", plugin_id);
                Ok(())
            }
            Err(e) => {
                warn!("Plugin '{}' reported an error while shutting down: {}", plugin_id, e);
                machine.notify(LifecycleEventKind::Error, e.to_string());
                Err(e)
            }
        }
    }

    pub async fn pause(&self, plugin_id: &str) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        managed.machine.transition_to(LifecycleState::Paused)?;
        Ok(())
    }

    pub async fn resume(&self, plugin_id: &str) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        if managed.machine.state() != LifecycleState::Paused {
            return Err(PluginSystemError::invalid_state(plugin_id, "plugin is not paused"));
        }
        managed.machine.transition_to(LifecycleState::Running)?;
        Ok(())
    }

    /// Full shutdown + initialize cycle.
    pub async fn restart(&self, plugin_id: &str) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        match managed.machine.state() {
            LifecycleState::Running | LifecycleState::Paused => {
                if let Err(e) = self.shutdown(plugin_id, false).await {
                    warn!("Shutdown before restart of '{}' failed: {}", plugin_id, e);
                }
            }
            LifecycleState::Stopping => self.shutdown(plugin_id, true).await?,
            _ => {}
        }
        self.initialize(plugin_id).await
    }

    /// Applies a configuration blob and remembers it for state backups.
    pub async fn configure(&self, plugin_id: &str, configuration: Value) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        let payload = configuration.clone();
        run_blocking(plugin_id, &managed.instance, move |p| p.configure(&payload)).await?;
        *managed.configuration.lock().unwrap_or_else(PoisonError::into_inner) = configuration;
        Ok(())
    }

    fn schedule_restart_evaluation(&self, plugin_id: String, managed: Arc<ManagedPlugin>) {
        let supervisor = self.clone();
        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            supervisor
                .evaluate_restart(&plugin_id, &managed, "initialization failure")
                .await;
        });
        tokio::spawn(task);
    }

    /// Whether `managed` is still the entry registered under `plugin_id`.
    async fn is_current(&self, plugin_id: &str, managed: &Arc<ManagedPlugin>) -> bool {
        self.inner
            .plugins
            .read()
            .await
            .get(plugin_id)
            .is_some_and(|live| Arc::ptr_eq(live, managed))
    }

    /// Restarts the plugin if auto-restart, the attempt budget and the
    /// cooldown all allow it. Returns whether a restart was attempted.
    ///
    /// Nothing happens once `managed` has been unregistered or replaced.
    async fn evaluate_restart(
        &self,
        plugin_id: &str,
        managed: &Arc<ManagedPlugin>,
        reason: &str,
    ) -> bool {
        if !self.is_current(plugin_id, managed).await {
            debug!("Plugin '{}' is no longer supervised, skipping restart", plugin_id);
            return false;
        }
        let config = &managed.config;
        if !config.auto_restart {
            return false;
        }

        let now = Instant::now();
        {
            let mut tracker = managed.restart.lock().unwrap_or_else(PoisonError::into_inner);
            if !tracker.can_restart(config.max_restart_attempts, config.restart_cooldown, now) {
                debug!("Restart of plugin '{}' suppressed by budget or cooldown", plugin_id);
                return false;
            }
            tracker.record_attempt(now);
        }

        info!("Restarting plugin '{}' after {}", plugin_id, reason);
        managed.machine.notify(LifecycleEventKind::RestartAttempted, reason);
        match self.restart(plugin_id).await {
            Ok(()) => {
                managed
                    .restart
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_success();
                managed
                    .machine
                    .notify(LifecycleEventKind::RestartSucceeded, "restart succeeded");
            }
            Err(e) => {
                warn!("Restart of plugin '{}' failed: {}", plugin_id, e);
                managed.machine.notify(LifecycleEventKind::RestartFailed, e.to_string());
            }
        }
        true
    }

    /// Runs one health check now.
    pub async fn check_health(&self, plugin_id: &str) -> Result<HealthStatus> {
        let managed = self.managed(plugin_id).await?;
        let predicate = self.predicate();
        let state = managed.machine.state();

        let started = Instant::now();
        let healthy = panic::catch_unwind(AssertUnwindSafe(|| {
            (*predicate)(managed.instance.as_ref(), state)
        }))
        .unwrap_or_else(|_| {
            warn!("Health predicate panicked for plugin '{}'", plugin_id);
            false
        });
        let elapsed = started.elapsed();

        let (mut status, was_healthy) = {
            let mut table = self.inner.health.write().await;
            let entry = table
                .entry(plugin_id.to_string())
                .or_insert_with(|| HealthStatus::new(plugin_id));
            let was_healthy = entry.healthy;
            entry.record(healthy, state, elapsed);
            (entry.clone(), was_healthy)
        };

        if healthy {
            if !was_healthy {
                managed
                    .machine
                    .notify(LifecycleEventKind::HealthRecovered, "health check passed");
            }
            return Ok(status);
        }

        managed.machine.notify(
            LifecycleEventKind::HealthCheckFailed,
            format!("{} consecutive failure(s) in state {}", status.consecutive_failures, state),
        );
        if status.consecutive_failures >= HEALTH_FAILURE_THRESHOLD
            && managed.config.auto_restart
            && self.evaluate_restart(plugin_id, &managed, "repeated health check failures").await
        {
            // A fresh run of failures is needed before the next attempt
            if let Some(entry) = self.inner.health.write().await.get_mut(plugin_id) {
                entry.consecutive_failures = 0;
                status = entry.clone();
            }
        }
        Ok(status)
    }

    /// Captures configuration, recent events, health and any native state.
    pub async fn backup_state(&self, plugin_id: &str) -> Result<StateBackup> {
        let managed = self.managed(plugin_id).await?;
        let configuration = managed
            .configuration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let transfer = StateTransfer::probe(managed.instance.as_ref());
        let state = if transfer.supports_backup() {
            match run_blocking(plugin_id, &managed.instance, |p| {
                p.execute_command(BACKUP_STATE_COMMAND, &Value::Null)
            })
            .await
            {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Native state backup of '{}' failed: {}", plugin_id, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(StateBackup {
            plugin_id: plugin_id.to_string(),
            configuration,
            recent_events: self.inner.events.recent_for(plugin_id, BACKUP_EVENT_LIMIT),
            health: self.health_status(plugin_id).await,
            state,
            created_at: std::time::SystemTime::now(),
        })
    }

    /// Restores a backup through `restore_state`, or by re-applying the stored configuration.
    pub async fn restore_state(&self, plugin_id: &str, backup: &StateBackup) -> Result<()> {
        if backup.plugin_id != plugin_id {
            return Err(PluginSystemError::InvalidParameters {
                message: format!(
                    "backup belongs to '{}', not '{}'",
                    backup.plugin_id, plugin_id
                ),
            });
        }
        let managed = self.managed(plugin_id).await?;
        let transfer = StateTransfer::probe(managed.instance.as_ref());

        if let (true, Some(state)) = (transfer.supports_restore(), backup.state.clone()) {
            run_blocking(plugin_id, &managed.instance, move |p| {
                p.execute_command(RESTORE_STATE_COMMAND, &state)
            })
            .await?;
            debug!("Restored native state of plugin '{}'", plugin_id);
        }
        if !backup.configuration.is_null() {
            self.configure(plugin_id, backup.configuration.clone()).await?;
        }
        Ok(())
    }

    /// Moves state across a version change via `migrate_state`, falling back to a restore.
    pub async fn migrate_state(
        &self,
        plugin_id: &str,
        backup: &StateBackup,
        from: &Version,
        to: &Version,
    ) -> Result<()> {
        let managed = self.managed(plugin_id).await?;
        if !StateTransfer::probe(managed.instance.as_ref()).supports_migrate() {
            return self.restore_state(plugin_id, backup).await;
        }

        let args = json!({
            "state": backup.payload().clone(),
            "from_version": from.to_string(),
            "to_version": to.to_string(),
        });
        run_blocking(plugin_id, &managed.instance, move |p| {
            p.execute_command(MIGRATE_STATE_COMMAND, &args)
        })
        .await?;
        if !backup.configuration.is_null() {
            self.configure(plugin_id, backup.configuration.clone()).await?;
        }
        info!("Migrated state of plugin '{}' from {} to {}", plugin_id, from, to);
        Ok(())
    }

    /// Shuts every plugin down concurrently against a single deadline.
    ///
    /// Shutdowns still pending at the deadline are abandoned and the plugin
    /// is shut down forcibly. Every plugin that did not stop gracefully is
    /// named in the returned error.
    pub async fn shutdown_all_gracefully(&self, deadline: Duration) -> Result<()> {
        let ids = self.registered_ids().await;
        if ids.is_empty() {
            return Ok(());
        }
        info!("Shutting down {} plugin(s) with a {:?} deadline", ids.len(), deadline);
        let deadline_at = tokio::time::Instant::now() + deadline;

        let mut pending = Vec::with_capacity(ids.len());
        for plugin_id in ids {
            let supervisor = self.clone();
            let workers = Arc::clone(&self.inner.workers);
            let task_id = plugin_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = workers.acquire_owned().await.map_err(|_| {
                    PluginSystemError::execution_failed(&task_id, "shutdown worker pool closed")
                })?;
                supervisor.shutdown(&task_id, false).await
            });
            pending.push((plugin_id, handle));
        }

        let mut failed = Vec::new();
        for (plugin_id, handle) in pending {
            let graceful = match tokio::time::timeout_at(deadline_at, handle).await {
                Ok(Ok(Ok(()))) => true,
                Ok(Ok(Err(e))) => {
                    warn!("Plugin '{}' did not shut down cleanly: {}", plugin_id, e);
                    false
                }
                Ok(Err(join_error)) => {
                    warn!("Shutdown task for '{}' failed: {}", plugin_id, join_error);
                    false
                }
                Err(_) => {
                    // Dropping the handle detaches the task; it is not cancelled
                    warn!("Shutdown of plugin '{}' missed the deadline", plugin_id);
                    false
                }
            };
            if !graceful {
                if let Err(e) = self.shutdown(&plugin_id, true).await {
                    error!("Forced shutdown of plugin '{}' failed: {}", plugin_id, e);
                }
                failed.push(plugin_id);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PluginSystemError::ExecutionFailed {
                plugin_id: None,
                message: format!(
                    "{} plugin(s) did not shut down gracefully: {}",
                    failed.len(),
                    failed.join(", ")
                ),
            })
        }
    }

    pub async fn state(&self, plugin_id: &str) -> Option<LifecycleState> {
        self.inner
            .plugins
            .read()
            .await
            .get(plugin_id)
            .map(|m| m.machine.state())
    }

    pub async fn health_status(&self, plugin_id: &str) -> Option<HealthStatus> {
        self.inner.health.read().await.get(plugin_id).cloned()
    }

    pub fn event_history(&self, plugin_id: &str) -> Vec<LifecycleEvent> {
        self.inner.events.history_for(plugin_id)
    }

    /// Restarts performed by auto-restart since registration.
    pub async fn restart_count(&self, plugin_id: &str) -> Option<u32> {
        let managed = self.inner.plugins.read().await.get(plugin_id).cloned()?;
        let total = managed
            .restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total();
        Some(total)
    }

    pub async fn is_registered(&self, plugin_id: &str) -> bool {
        self.inner.plugins.read().await.contains_key(plugin_id)
    }

    /// Registered plugin ids in ascending order.
    pub async fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.plugins.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self, filter: EventFilter) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        self.inner.events.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }
}
