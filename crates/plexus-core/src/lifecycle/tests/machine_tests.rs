#![cfg(test)]

use std::sync::Arc;

use crate::lifecycle::events::{EventFilter, LifecycleEventBus, LifecycleEventKind};
use crate::lifecycle::machine::PluginStateMachine;
use crate::lifecycle::state::LifecycleState;
use crate::plugin_system::error::ErrorKind;

use LifecycleState::*;

#[test]
fn transition_table() {
    let allowed = [
        (Unloaded, Loading),
        (Loading, Loaded),
        (Loaded, Initializing),
        (Initializing, Running),
        (Running, Paused),
        (Paused, Running),
        (Running, Stopping),
        (Paused, Stopping),
        (Stopping, Stopped),
        (Stopped, Unloaded),
        (Error, Reloading),
        (Reloading, Loaded),
    ];
    for (from, to) in allowed {
        assert!(from.can_transition_to(to), "{from} -> {to}");
    }

    let refused = [
        (Unloaded, Running),
        (Loaded, Running),
        (Running, Loaded),
        (Stopping, Running),
        (Stopped, Running),
        (Error, Running),
        (Stopping, Error),
        (Stopped, Error),
        (Running, Running),
    ];
    for (from, to) in refused {
        assert!(!from.can_transition_to(to), "{from} -> {to}");
    }

    // Every non-terminal working state can fail
    for state in [Loading, Loaded, Initializing, Running, Paused, Reloading] {
        assert!(state.can_transition_to(Error), "{state}");
    }
}

#[test]
fn state_helpers() {
    assert!(Running.is_active());
    assert!(Paused.is_active());
    assert!(!Stopping.is_active());
    assert_eq!(LifecycleState::default(), Unloaded);
    assert_eq!(Initializing.to_string(), "initializing");
    assert_eq!(serde_json::to_string(&Reloading).unwrap(), "\"reloading\"");
}

#[test]
fn machine_walks_the_happy_path() {
    let machine = PluginStateMachine::new("walker");
    assert_eq!(machine.state(), Unloaded);

    for step in [Loading, Loaded, Initializing, Running, Stopping, Stopped, Unloaded] {
        machine.transition_to(step).unwrap();
    }
    assert_eq!(machine.state(), Unloaded);
}

#[test]
fn invalid_transition_leaves_state_alone() {
    let machine = PluginStateMachine::new("stubborn");
    let err = machine.transition_to(Running).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(err.to_string().contains("unloaded -> running"));
    assert_eq!(machine.state(), Unloaded);
    assert!(!machine.can_transition_to(Running));
    assert!(machine.can_transition_to(Loading));
}

#[test]
fn overrides_bypass_the_table() {
    let bus = Arc::new(LifecycleEventBus::new(16));
    let machine = PluginStateMachine::with_event_bus("forced", Arc::clone(&bus));
    machine.transition_to(Loading).unwrap();

    assert_eq!(machine.force_error("disk on fire"), Loading);
    assert_eq!(machine.state(), Error);
    // Repeating is a no-op and publishes nothing
    machine.force_error("still on fire");

    assert_eq!(machine.reset(), Error);
    assert_eq!(machine.state(), Unloaded);
    machine.reset();

    let history = bus.history_for("forced");
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].to, Some(Error));
    assert_eq!(history[1].message.as_deref(), Some("disk on fire"));
    assert_eq!(history[2].message.as_deref(), Some("reset"));
}

#[tokio::test]
async fn subscribers_see_transitions_in_commit_order() {
    let bus = Arc::new(LifecycleEventBus::new(64));
    let (_id, mut events) = bus.subscribe(EventFilter::for_plugin("ordered"));
    let machine = PluginStateMachine::with_event_bus("ordered", Arc::clone(&bus));

    machine.transition_to(Loading).unwrap();
    machine.transition_to(Loaded).unwrap();
    machine.notify(LifecycleEventKind::HealthCheckFailed, "probe");
    machine.transition_to(Initializing).unwrap();

    let first = events.recv().await.unwrap();
    assert_eq!((first.from, first.to), (Some(Unloaded), Some(Loading)));
    let second = events.recv().await.unwrap();
    assert_eq!((second.from, second.to), (Some(Loading), Some(Loaded)));
    let third = events.recv().await.unwrap();
    assert_eq!(third.kind, LifecycleEventKind::HealthCheckFailed);
    assert_eq!(third.to, None);
    let fourth = events.recv().await.unwrap();
    assert_eq!(fourth.to, Some(Initializing));
}
