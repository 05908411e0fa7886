//! All-or-nothing batches of async operations.
//!
//! A [`Transaction`] holds ordered (forward, compensating) pairs. `commit`
//! runs the forward operations in order; the first failure rolls back the
//! operations that already completed, newest first, and its error is the one
//! returned. Each operation runs at most once. After a commit or rollback the
//! transaction accepts no further calls.
use std::future::Future;
use std::pin::Pin;

use log::{debug, warn};

use crate::plugin_system::error::{PluginSystemError, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Operation = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Step {
    description: String,
    forward: Option<Operation>,
    compensate: Option<Operation>,
}

#[derive(Default)]
pub struct Transaction {
    steps: Vec<Step>,
    completed: usize,
    committed: bool,
    rolled_back: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operation<F, FFut, C, CFut>(
        &mut self,
        description: impl Into<String>,
        forward: F,
        compensate: C,
    ) -> &mut Self
    where
        F: FnOnce() -> FFut + Send + 'static,
        FFut: Future<Output = Result<()>> + Send + 'static,
        C: FnOnce() -> CFut + Send + 'static,
        CFut: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push(Step {
            description: description.into(),
            forward: Some(Box::new(move || Box::pin(forward()) as BoxFuture<'static, Result<()>>)),
            compensate: Some(Box::new(move || Box::pin(compensate()) as BoxFuture<'static, Result<()>>)),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Forward operations that completed successfully.
    pub fn completed_operations(&self) -> usize {
        self.completed
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.committed || self.rolled_back {
            return Err(PluginSystemError::InvalidState {
                plugin_id: "<transaction>".to_string(),
                message: format!(
                    "cannot {} a transaction that was already {}",
                    action,
                    if self.committed { "committed" } else { "rolled back" }
                ),
            });
        }
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open("commit")?;
        for index in self.completed..self.steps.len() {
            let step = &mut self.steps[index];
            let Some(forward) = step.forward.take() else {
                continue;
            };
            debug!("Transaction step {}: {}", index + 1, step.description);
            if let Err(e) = forward().await {
                warn!("Transaction step '{}' failed: {}", step.description, e);
                if let Err(rollback_err) = self.rollback().await {
                    warn!("Rollback after failed step did not run: {}", rollback_err);
                }
                return Err(e);
            }
            self.completed += 1;
        }
        self.committed = true;
        Ok(())
    }

    /// Undoes completed operations in reverse order. Compensation failures are logged.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open("roll back")?;
        for step in self.steps[..self.completed].iter_mut().rev() {
            let Some(compensate) = step.compensate.take() else {
                continue;
            };
            debug!("Compensating '{}'", step.description);
            if let Err(e) = compensate().await {
                warn!("Compensation for '{}' failed: {}", step.description, e);
            }
        }
        self.rolled_back = true;
        Ok(())
    }
}
