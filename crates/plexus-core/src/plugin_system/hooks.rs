//! Ordered callbacks around load and unload.
//!
//! Pre-load and pre-unload hooks can veto the operation by returning an
//! error; post-load hook failures are only logged. A panicking hook is
//! treated as a failing one.
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use crate::plugin_system::error::{PluginSystemError, Result};

pub type HookId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreLoad,
    PostLoad,
    PreUnload,
}

/// What a hook is told about the operation in progress.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub point: HookPoint,
    pub plugin_id: String,
    pub path: Option<PathBuf>,
}

pub type HookFn = Arc<dyn Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync>;

/// Hook lists, one per [`HookPoint`], each kept in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookPoint, Vec<(HookId, HookFn)>>>,
    next_id: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, point: HookPoint, hook: F) -> HookId
    where
        F: Fn(&HookContext) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(point)
            .or_default()
            .push((id, Arc::new(hook)));
        debug!("Registered {:?} hook #{}", point, id);
        id
    }

    /// Removes a hook from whichever list holds it.
    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        for list in hooks.values_mut() {
            if let Some(index) = list.iter().position(|(hook_id, _)| *hook_id == id) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    pub fn count(&self, point: HookPoint) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&point)
            .map_or(0, Vec::len)
    }

    // Snapshot so hooks run without the lock held
    fn snapshot(&self, point: HookPoint) -> Vec<(HookId, HookFn)> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&point)
            .cloned()
            .unwrap_or_default()
    }

    fn invoke(id: HookId, hook: &HookFn, context: &HookContext) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (**hook)(context)));
        let message = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(message)) => message,
            Err(_) => "hook panicked".to_string(),
        };
        Err(PluginSystemError::execution_failed(
            &context.plugin_id,
            format!("{:?} hook #{} failed: {}", context.point, id, message),
        ))
    }

    /// Runs the hooks for `context.point`, stopping at the first failure.
    pub fn run(&self, context: &HookContext) -> Result<()> {
        for (id, hook) in self.snapshot(context.point) {
            Self::invoke(id, &hook, context)?;
        }
        Ok(())
    }

    /// Runs every hook for `context.point` and returns the failures.
    pub fn run_all(&self, context: &HookContext) -> Vec<PluginSystemError> {
        let mut failures = Vec::new();
        for (id, hook) in self.snapshot(context.point) {
            if let Err(e) = Self::invoke(id, &hook, context) {
                warn!("{}", e);
                failures.push(e);
            }
        }
        failures
    }
}
