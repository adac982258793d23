//! Completion signals and the registry that indexes them
//!
//! A [`CompletionSignal`] is a one-shot, multi-reader event. It is backed by a
//! `watch` channel holding `Option<Signal>`: `None` while unset, `Some` once the
//! owning executor has fired it. Writing and waking every waiter happen in the
//! same `send_if_modified` call, and waiters that subscribe after the write see
//! the stored value immediately.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::coord::types::{Signal, TaskFailure, TaskSet};
use crate::core::errors::SignalError;

/// One-shot completion event for a single task
#[derive(Debug)]
pub struct CompletionSignal {
    task: String,
    tx: watch::Sender<Option<Signal>>,
}

impl CompletionSignal {
    pub fn new(task: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            task: task.into(),
            tx,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn set_success(&self) -> Result<(), SignalError> {
        self.fire(Signal::Success)
    }

    pub fn set_failure(&self, cause: Arc<TaskFailure>) -> Result<(), SignalError> {
        self.fire(Signal::Failure(cause))
    }

    /// Store `signal` unless a value is already present; first writer wins.
    pub fn fire(&self, signal: Signal) -> Result<(), SignalError> {
        let fired = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(signal);
            true
        });

        if fired {
            Ok(())
        } else {
            Err(SignalError::AlreadySet {
                task: self.task.clone(),
            })
        }
    }

    /// Suspend until the signal is set and return its value.
    ///
    /// Returns at once when the signal has already fired.
    pub async fn wait(&self) -> Signal {
        let mut rx = self.tx.subscribe();
        // Err is unreachable while `self` holds the sender
        let value = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| (*slot).clone());
        value.unwrap_or_else(|| {
            Signal::Failure(Arc::new(TaskFailure::Aborted {
                task: self.task.clone(),
                message: "completion signal closed before it was set".into(),
            }))
        })
    }

    /// Current value without waiting
    pub fn peek(&self) -> Option<Signal> {
        self.tx.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Maps task identity to its completion signal.
///
/// Built once from a [`TaskSet`]; there is no way to add or remove entries
/// afterwards, so lookups from concurrent executors need no locking.
#[derive(Clone, Debug, Default)]
pub struct SignalRegistry {
    signals: Arc<HashMap<String, Arc<CompletionSignal>>>,
}

impl SignalRegistry {
    /// One unset signal per record
    pub fn build(tasks: &TaskSet) -> Self {
        let signals = tasks
            .records()
            .iter()
            .map(|r| (r.name().to_string(), Arc::new(CompletionSignal::new(r.name()))))
            .collect();
        Self {
            signals: Arc::new(signals),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CompletionSignal>> {
        self.signals.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Names of signals that have not fired yet, sorted
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .signals
            .iter()
            .filter(|(_, s)| !s.is_set())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort_unstable();
        names
    }
}
