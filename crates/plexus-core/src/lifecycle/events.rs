//! # Lifecycle event bus
//!
//! Every committed state transition, health result and restart attempt is
//! published here. Publishing appends to a bounded history and enqueues a copy
//! into each matching subscriber's unbounded channel; it never waits on a
//! subscriber, so a slow consumer cannot delay or undo a transition.
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::constants::EVENT_HISTORY_LIMIT;
use crate::lifecycle::state::LifecycleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    StateChanged,
    HealthCheckFailed,
    HealthRecovered,
    RestartAttempted,
    RestartSucceeded,
    RestartFailed,
    InitializationTimeout,
    ShutdownTimeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub plugin_id: String,
    pub kind: LifecycleEventKind,
    pub from: Option<LifecycleState>,
    pub to: Option<LifecycleState>,
    pub timestamp: SystemTime,
    pub message: Option<String>,
}

impl LifecycleEvent {
    pub fn new(plugin_id: impl Into<String>, kind: LifecycleEventKind) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            kind,
            from: None,
            to: None,
            timestamp: SystemTime::now(),
            message: None,
        }
    }

    pub fn state_changed(plugin_id: impl Into<String>, from: LifecycleState, to: LifecycleState) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::new(plugin_id, LifecycleEventKind::StateChanged)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Selects which events a subscriber receives. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub plugin_id: Option<String>,
    pub kinds: Option<HashSet<LifecycleEventKind>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_plugin(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: Some(plugin_id.into()),
            kinds: None,
        }
    }

    pub fn with_kind(mut self, kind: LifecycleEventKind) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        let plugin_ok = self.plugin_id.as_deref().is_none_or(|id| id == event.plugin_id);
        let kind_ok = self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&event.kind));
        plugin_ok && kind_ok
    }
}

pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

pub struct LifecycleEventBus {
    history: Mutex<VecDeque<LifecycleEvent>>,
    history_limit: usize,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl LifecycleEventBus {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Records `event` and fans it out to matching subscribers.
    pub fn publish(&self, event: LifecycleEvent) {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(event.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }

        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            for subscriber in subscribers.iter().filter(|s| s.filter.matches(&event)) {
                if subscriber.sender.send(event.clone()).is_err() {
                    closed.push(subscriber.id);
                }
            }
        }

        // Receivers dropped without unsubscribing
        if !closed.is_empty() {
            debug!("Dropping {} closed lifecycle subscription(s)", closed.len());
            let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|s| !closed.contains(&s.id));
        }
    }

    pub fn subscribe(&self, filter: EventFilter) -> (SubscriptionId, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, filter, sender });
        (id, receiver)
    }

    /// Removes a subscription. Returns false if it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Full retained history, oldest first.
    pub fn history(&self) -> Vec<LifecycleEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn history_for(&self, plugin_id: &str) -> Vec<LifecycleEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.plugin_id == plugin_id)
            .cloned()
            .collect()
    }

    /// The `limit` most recent events for `plugin_id`, oldest first.
    pub fn recent_for(&self, plugin_id: &str, limit: usize) -> Vec<LifecycleEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut recent: Vec<LifecycleEvent> = history
            .iter()
            .rev()
            .filter(|e| e.plugin_id == plugin_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for LifecycleEventBus {
    fn default() -> Self {
        Self::new(EVENT_HISTORY_LIMIT)
    }
}
