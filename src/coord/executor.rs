//! Per-task state machine
//!
//! ```text
//! Pending ──► Waiting ──► Running ──► Succeeded
//!    │           │           └──────► Failed (workload error or panic)
//!    │           └──────────────────► Failed (predecessor failed, never runs)
//!    └─────────────────► Running     (no predecessor, or predecessor unknown)
//! ```
//!
//! Whatever path is taken, the executor fires its own completion signal exactly
//! once before returning, so tasks waiting on it always wake up.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

use crate::coord::action::{SimulatedWork, Workload};
use crate::coord::events::{Emitter, EventSink, LoggingEventSink, TaskEvent};
use crate::coord::signal::SignalRegistry;
use crate::coord::types::{Signal, TaskFailure, TaskOutcome, TaskRecord, TaskState};

/// Runs one task to a terminal state
pub struct TaskExecutor {
    record: TaskRecord,
    registry: SignalRegistry,
    workload: Arc<dyn Workload>,
    emitter: Arc<Emitter>,
    time_unit: Duration,
    state: TaskState,
    started: Arc<OnceLock<DateTime<Utc>>>,
}

impl TaskExecutor {
    /// Executor with simulated work, log output and one-second time units
    pub fn new(record: TaskRecord, registry: SignalRegistry) -> Self {
        Self {
            record,
            registry,
            workload: Arc::new(SimulatedWork),
            emitter: Arc::new(Emitter::new(Uuid::new_v4(), Arc::new(LoggingEventSink))),
            time_unit: Duration::from_secs(1),
            state: TaskState::Pending,
            started: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.emitter = Arc::new(Emitter::new(Uuid::new_v4(), sink));
        self
    }

    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit = unit;
        self
    }

    pub(crate) fn with_emitter(mut self, emitter: Arc<Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Set once when the task enters `Running`; outlives the executor
    pub(crate) fn with_start_marker(mut self, started: Arc<OnceLock<DateTime<Utc>>>) -> Self {
        self.started = started;
        self
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Drive the task to `Succeeded` or `Failed`.
    ///
    /// Never fails: faults become the failure value of the task's signal.
    pub async fn run(mut self) -> TaskOutcome {
        let mut missing_predecessor = None;

        let signal = match self.wait_for_predecessor(&mut missing_predecessor).await {
            Some(cascaded) => Signal::Failure(cascaded),
            None => self.execute().await,
        };

        self.publish(&signal);
        let started_at = self.started.get().copied();

        TaskOutcome {
            name: self.record.name().to_string(),
            state: self.state,
            failure: signal.failure().cloned(),
            missing_predecessor,
            ran: started_at.is_some(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Returns the cascaded failure when the predecessor failed.
    async fn wait_for_predecessor(
        &mut self,
        missing: &mut Option<String>,
    ) -> Option<Arc<TaskFailure>> {
        let predecessor = self.record.blocks_on()?.to_string();

        let Some(signal) = self.registry.get(&predecessor) else {
            self.emitter.emit(TaskEvent::PredecessorMissing {
                task: self.record.name().to_string(),
                predecessor: predecessor.clone(),
            });
            *missing = Some(predecessor);
            return None;
        };

        self.state = TaskState::Waiting;
        self.emitter.emit(TaskEvent::Waiting {
            task: self.record.name().to_string(),
            predecessor: predecessor.clone(),
        });

        match signal.wait().await {
            Signal::Success => None,
            Signal::Failure(cause) => {
                self.state = TaskState::Failed;
                let failure = Arc::new(TaskFailure::Predecessor {
                    task: self.record.name().to_string(),
                    predecessor,
                    cause,
                });
                self.emitter.emit(TaskEvent::Failed {
                    task: self.record.name().to_string(),
                    cause: failure.clone(),
                    ran: false,
                });
                Some(failure)
            }
        }
    }

    async fn execute(&mut self) -> Signal {
        self.state = TaskState::Running;
        // a marker is only ever set here, once per executor
        let _ = self.started.set(Utc::now());
        let duration = self.record.duration(self.time_unit);
        self.emitter.emit(TaskEvent::Started {
            task: self.record.name().to_string(),
            duration,
        });

        let clock = tokio::time::Instant::now();
        let result = AssertUnwindSafe(self.workload.perform(&self.record, duration))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => {
                self.state = TaskState::Succeeded;
                self.emitter.emit(TaskEvent::Succeeded {
                    task: self.record.name().to_string(),
                    elapsed: clock.elapsed(),
                });
                return Signal::Success;
            }
            Ok(Err(e)) => TaskFailure::Execution {
                task: self.record.name().to_string(),
                message: format!("{e:#}"),
            },
            Err(panic) => TaskFailure::Panicked {
                task: self.record.name().to_string(),
                message: panic_message(panic.as_ref()),
            },
        };

        self.state = TaskState::Failed;
        let failure = Arc::new(failure);
        self.emitter.emit(TaskEvent::Failed {
            task: self.record.name().to_string(),
            cause: failure.clone(),
            ran: true,
        });
        Signal::Failure(failure)
    }

    fn publish(&self, signal: &Signal) {
        match self.registry.get(self.record.name()) {
            Some(own) => {
                if let Err(e) = own.fire(signal.clone()) {
                    tracing::error!("Signal already fired for {}: {}", self.record.name(), e);
                }
            }
            None => {
                tracing::error!(
                    "No completion signal registered for {}; dependents cannot observe it",
                    self.record.name()
                );
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
