#![cfg(test)]
// crates/plexus-core/src/lifecycle/tests/supervisor_tests.rs

use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde_json::json;
use tokio::time::{sleep, timeout};

use crate::config::LifecycleConfig;
use crate::lifecycle::events::{EventFilter, LifecycleEventKind};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::supervisor::LifecycleSupervisor;
use crate::plugin_system::error::{ErrorKind, PluginSystemError};
use crate::plugin_system::traits::PluginInstance;
use crate::tests::common::{InitBehaviour, MockPlugin, fast_lifecycle};

fn supervisor() -> LifecycleSupervisor {
    LifecycleSupervisor::new(LifecycleConfig::default())
}

fn kinds(supervisor: &LifecycleSupervisor, plugin_id: &str) -> Vec<LifecycleEventKind> {
    supervisor
        .event_history(plugin_id)
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

async fn wait_for_state(supervisor: &LifecycleSupervisor, plugin_id: &str, state: LifecycleState) {
    timeout(Duration::from_secs(5), async {
        while supervisor.state(plugin_id).await != Some(state) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("'{plugin_id}' never reached {state}"));
}

#[tokio::test]
async fn register_and_unregister() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("p").into_arc(), None).await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Unloaded));
    assert!(supervisor.health_status("p").await.unwrap().healthy);
    assert_eq!(supervisor.restart_count("p").await, Some(0));

    let err = supervisor
        .register(MockPlugin::new("p").into_arc(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    supervisor.unregister("p").await.unwrap();
    assert!(!supervisor.is_registered("p").await);
    assert!(supervisor.health_status("p").await.is_none());
    assert_eq!(supervisor.unregister("p").await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(supervisor.initialize("p").await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn initialize_walks_up_to_running() {
    let supervisor = supervisor();
    let plugin = MockPlugin::new("p");
    let counters = plugin.counters();
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    supervisor.initialize("p").await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Running));
    let path: Vec<_> = supervisor
        .event_history("p")
        .into_iter()
        .filter_map(|e| e.to)
        .collect();
    assert_eq!(
        path,
        vec![
            LifecycleState::Loading,
            LifecycleState::Loaded,
            LifecycleState::Initializing,
            LifecycleState::Running,
        ]
    );

    // Already running
    supervisor.initialize("p").await.unwrap();
    assert_eq!(counters.init_calls(), 1);
}

#[tokio::test]
async fn failed_initialize_can_be_retried_from_error() {
    let supervisor = supervisor();
    let plugin = MockPlugin::new("flaky").with_init(InitBehaviour::FailTimes(1));
    let counters = plugin.counters();
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    let err = supervisor.initialize("flaky").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    assert_eq!(supervisor.state("flaky").await, Some(LifecycleState::Error));
    assert!(kinds(&supervisor, "flaky").contains(&LifecycleEventKind::Error));

    supervisor.initialize("flaky").await.unwrap();
    assert_eq!(supervisor.state("flaky").await, Some(LifecycleState::Running));
    assert_eq!(counters.init_calls(), 2);
}

#[tokio::test]
async fn initialize_times_out_without_waiting_for_the_plugin() {
    let supervisor = LifecycleSupervisor::new(fast_lifecycle());
    let plugin = MockPlugin::new("slow").with_init(InitBehaviour::Delay(Duration::from_millis(800)));
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    let started = std::time::Instant::now();
    let err = supervisor.initialize("slow").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(700));
    assert!(matches!(err, PluginSystemError::OperationCancelled { .. }));
    assert_eq!(supervisor.state("slow").await, Some(LifecycleState::Error));
    assert!(kinds(&supervisor, "slow").contains(&LifecycleEventKind::InitializationTimeout));
}

#[tokio::test]
async fn panicking_plugin_ends_in_error() {
    let supervisor = supervisor();
    supervisor
        .register(MockPlugin::new("wild").with_init(InitBehaviour::Panic).into_arc(), None)
        .await
        .unwrap();

    let err = supervisor.initialize("wild").await.unwrap_err();
    assert!(err.to_string().contains("panicked"));
    assert_eq!(supervisor.state("wild").await, Some(LifecycleState::Error));
}

#[tokio::test]
async fn pause_and_resume() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("p").into_arc(), None).await.unwrap();
    assert_eq!(supervisor.pause("p").await.unwrap_err().kind(), ErrorKind::InvalidState);

    supervisor.initialize("p").await.unwrap();
    assert_eq!(supervisor.resume("p").await.unwrap_err().kind(), ErrorKind::InvalidState);
    supervisor.pause("p").await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Paused));
    supervisor.resume("p").await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Running));
}

#[tokio::test]
async fn shutdown_paths() {
    let supervisor = supervisor();
    let plugin = MockPlugin::new("p");
    let counters = plugin.counters();
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    // Nothing to stop yet
    supervisor.shutdown("p", false).await.unwrap();
    assert_eq!(counters.shutdown_calls(), 0);

    supervisor.mark_loaded("p").await.unwrap();
    let err = supervisor.shutdown("p", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    supervisor.shutdown("p", true).await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Unloaded));
    assert_eq!(counters.shutdown_calls(), 1);

    supervisor.initialize("p").await.unwrap();
    supervisor.shutdown("p", false).await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Stopped));
    assert_eq!(counters.shutdown_calls(), 2);

    // A stopped plugin can be brought back
    supervisor.initialize("p").await.unwrap();
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Running));
}

#[tokio::test]
async fn shutdown_error_still_stops() {
    let supervisor = supervisor();
    supervisor
        .register(MockPlugin::new("p").with_failing_shutdown().into_arc(), None)
        .await
        .unwrap();
    supervisor.initialize("p").await.unwrap();

    assert!(supervisor.shutdown("p", false).await.is_err());
    assert_eq!(supervisor.state("p").await, Some(LifecycleState::Stopped));
}

#[tokio::test]
async fn slow_graceful_shutdown_is_retried() {
    let supervisor = LifecycleSupervisor::new(fast_lifecycle());
    let plugin = MockPlugin::new("lazy").with_shutdown_delay(Duration::from_millis(400));
    let counters = plugin.counters();
    supervisor.register(plugin.into_arc(), None).await.unwrap();
    supervisor.initialize("lazy").await.unwrap();

    supervisor.shutdown("lazy", false).await.unwrap();
    assert_eq!(supervisor.state("lazy").await, Some(LifecycleState::Stopped));
    assert!(kinds(&supervisor, "lazy").contains(&LifecycleEventKind::ShutdownTimeout));
    assert_eq!(counters.shutdown_calls(), 2);
}

#[tokio::test]
async fn shutdown_all_names_plugins_that_miss_the_deadline() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("a-quick").into_arc(), None).await.unwrap();
    supervisor
        .register(
            MockPlugin::new("b-slow")
                .with_shutdown_delay(Duration::from_millis(600))
                .into_arc(),
            None,
        )
        .await
        .unwrap();
    supervisor.initialize("a-quick").await.unwrap();
    supervisor.initialize("b-slow").await.unwrap();

    let err = supervisor
        .shutdown_all_gracefully(Duration::from_millis(100))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("b-slow"), "{message}");
    assert!(!message.contains("a-quick"), "{message}");

    assert_eq!(supervisor.state("a-quick").await, Some(LifecycleState::Stopped));
    assert_eq!(supervisor.state("b-slow").await, Some(LifecycleState::Stopped));
}

#[tokio::test]
async fn shutdown_all_with_nothing_registered() {
    supervisor()
        .shutdown_all_gracefully(Duration::from_millis(10))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_initialization_is_restarted_within_budget() {
    let config = LifecycleConfig {
        auto_restart: true,
        max_restart_attempts: 2,
        restart_cooldown: Duration::ZERO,
        ..LifecycleConfig::default()
    };
    let supervisor = LifecycleSupervisor::new(config);
    let plugin = MockPlugin::new("doomed").with_init(InitBehaviour::FailTimes(100));
    let counters = plugin.counters();
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    assert!(supervisor.initialize("doomed").await.is_err());
    timeout(Duration::from_secs(5), async {
        while supervisor.restart_count("doomed").await != Some(2) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.restart_count("doomed").await, Some(2));
    assert_eq!(counters.init_calls(), 3);
    assert_eq!(supervisor.state("doomed").await, Some(LifecycleState::Error));
}

#[tokio::test]
async fn recovering_plugin_is_restarted_once() {
    let config = LifecycleConfig {
        auto_restart: true,
        restart_cooldown: Duration::ZERO,
        ..LifecycleConfig::default()
    };
    let supervisor = LifecycleSupervisor::new(config);
    let plugin = MockPlugin::new("flaky").with_init(InitBehaviour::FailTimes(1));
    supervisor.register(plugin.into_arc(), None).await.unwrap();

    assert!(supervisor.initialize("flaky").await.is_err());
    wait_for_state(&supervisor, "flaky", LifecycleState::Running).await;
    assert_eq!(supervisor.restart_count("flaky").await, Some(1));
    assert!(kinds(&supervisor, "flaky").contains(&LifecycleEventKind::RestartSucceeded));
}

#[tokio::test]
async fn unhealthy_plugin_restarts_once_per_cooldown() {
    let config = LifecycleConfig {
        enable_health_monitoring: true,
        health_check_interval: Duration::from_millis(20),
        auto_restart: true,
        restart_cooldown: Duration::from_secs(10),
        ..LifecycleConfig::default()
    };
    let supervisor = LifecycleSupervisor::new(config);
    supervisor.set_health_predicate(Arc::new(|_: &dyn PluginInstance, _: LifecycleState| false));
    let (_, mut restarts) = supervisor
        .subscribe(EventFilter::for_plugin("sick").with_kind(LifecycleEventKind::RestartAttempted));

    supervisor.register(MockPlugin::new("sick").into_arc(), None).await.unwrap();
    supervisor.initialize("sick").await.unwrap();

    timeout(Duration::from_secs(5), restarts.recv())
        .await
        .unwrap()
        .unwrap();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(supervisor.restart_count("sick").await, Some(1));
    assert!(restarts.try_recv().is_err());
    let health = supervisor.health_status("sick").await.unwrap();
    assert!(!health.healthy);
    assert!(health.consecutive_failures >= 3);
}

#[tokio::test]
async fn manual_health_checks() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("p").into_arc(), None).await.unwrap();

    let status = supervisor.check_health("p").await.unwrap();
    assert!(!status.healthy);
    assert_eq!(status.consecutive_failures, 1);

    supervisor.initialize("p").await.unwrap();
    let status = supervisor.check_health("p").await.unwrap();
    assert!(status.healthy);
    assert_eq!(status.consecutive_failures, 0);
    assert!(kinds(&supervisor, "p").contains(&LifecycleEventKind::HealthRecovered));

    supervisor.set_health_predicate(Arc::new(
        |_: &dyn PluginInstance, _: LifecycleState| -> bool { panic!("predicate bug") },
    ));
    assert!(!supervisor.check_health("p").await.unwrap().healthy);
    // No auto-restart configured
    assert_eq!(supervisor.restart_count("p").await, Some(0));
}

#[tokio::test]
async fn backup_captures_configuration_and_native_state() {
    let supervisor = supervisor();
    let plugin = Arc::new(MockPlugin::new("cache").with_state_commands());
    plugin.set_stored(json!([1, 2]));
    supervisor.register(plugin.clone(), None).await.unwrap();
    supervisor.initialize("cache").await.unwrap();
    supervisor.configure("cache", json!({ "size": 8 })).await.unwrap();

    let backup = supervisor.backup_state("cache").await.unwrap();
    assert_eq!(backup.plugin_id, "cache");
    assert_eq!(backup.configuration, json!({ "size": 8 }));
    assert_eq!(backup.state, Some(json!({ "value": [1, 2] })));
    assert!(!backup.recent_events.is_empty());
    assert!(backup.recent_events.len() <= crate::constants::BACKUP_EVENT_LIMIT);
    assert!(backup.health.is_some());

    plugin.set_stored(json!(null));
    supervisor.restore_state("cache", &backup).await.unwrap();
    assert_eq!(plugin.stored(), json!([1, 2]));
}

#[tokio::test]
async fn restore_refuses_foreign_backups() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("a").into_arc(), None).await.unwrap();
    supervisor.register(MockPlugin::new("b").into_arc(), None).await.unwrap();

    let backup = supervisor.backup_state("a").await.unwrap();
    let err = supervisor.restore_state("b", &backup).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameters);
}

#[tokio::test]
async fn migrate_falls_back_to_restore() {
    let supervisor = supervisor();
    let old = Arc::new(MockPlugin::new("plain"));
    supervisor.register(old.clone(), None).await.unwrap();
    supervisor.configure("plain", json!({ "level": 3 })).await.unwrap();
    let backup = supervisor.backup_state("plain").await.unwrap();
    assert!(backup.state.is_none());
    supervisor.unregister("plain").await.unwrap();

    let new = Arc::new(MockPlugin::new("plain").with_version("2.0.0"));
    supervisor.register(new.clone(), None).await.unwrap();
    supervisor
        .migrate_state("plain", &backup, &Version::new(1, 0, 0), &Version::new(2, 0, 0))
        .await
        .unwrap();
    assert_eq!(new.configuration(), json!({ "level": 3 }));
}

#[tokio::test]
async fn rejected_configuration_is_not_remembered() {
    let supervisor = supervisor();
    supervisor.register(MockPlugin::new("p").into_arc(), None).await.unwrap();
    supervisor.configure("p", json!({ "a": 1 })).await.unwrap();
    assert!(supervisor.configure("p", json!({ "reject": 1 })).await.is_err());

    let backup = supervisor.backup_state("p").await.unwrap();
    assert_eq!(backup.configuration, json!({ "a": 1 }));
}

#[tokio::test]
async fn pending_restart_ignores_a_replaced_plugin() {
    let config = LifecycleConfig {
        auto_restart: true,
        restart_cooldown: Duration::ZERO,
        ..LifecycleConfig::default()
    };
    let supervisor = LifecycleSupervisor::new(config);
    let first = MockPlugin::new("swapped").with_init(InitBehaviour::FailTimes(1));
    let first_counters = first.counters();
    supervisor.register(first.into_arc(), None).await.unwrap();
    assert!(supervisor.initialize("swapped").await.is_err());

    supervisor.unregister("swapped").await.unwrap();
    let second = MockPlugin::new("swapped");
    let second_counters = second.counters();
    supervisor.register(second.into_arc(), None).await.unwrap();
    supervisor.mark_loaded("swapped").await.unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(first_counters.init_calls(), 1);
    assert_eq!(second_counters.init_calls(), 0);
    assert_eq!(supervisor.state("swapped").await, Some(LifecycleState::Loaded));
    assert_eq!(supervisor.restart_count("swapped").await, Some(0));
}
