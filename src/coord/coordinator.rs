//! Coordinator - launches every task and waits for all of them
//!
//! The coordinator builds the signal registry before anything is spawned, so
//! every predecessor lookup succeeds or fails deterministically. It then
//! spawns one executor per record and joins them through a
//! `FuturesUnordered` barrier; the run only reports once every executor has
//! reached a terminal state.

use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::coord::action::{SimulatedWork, Workload};
use crate::coord::events::{Emitter, EventSink, LoggingEventSink, TaskEvent};
use crate::coord::executor::{panic_message, TaskExecutor};
use crate::coord::signal::SignalRegistry;
use crate::coord::types::{
    RunReport, Signal, TaskFailure, TaskOutcome, TaskRecord, TaskSet, TaskState,
};
use crate::core::config::RunConfig;

/// Runs a task set concurrently, honouring each task's predecessor
pub struct Coordinator {
    config: RunConfig,
    workload: Arc<dyn Workload>,
    sink: Arc<dyn EventSink>,
}

impl Coordinator {
    /// Create a coordinator with simulated work and log output
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            workload: Arc::new(SimulatedWork),
            sink: Arc::new(LoggingEventSink),
        }
    }

    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Build one unset completion signal per record.
    ///
    /// Must happen before any executor is spawned.
    pub fn initialize(&self, tasks: &TaskSet) -> SignalRegistry {
        let registry = SignalRegistry::build(tasks);
        tracing::debug!("Registered {} completion signals", registry.len());
        registry
    }

    /// Run every task to a terminal state and report.
    ///
    /// Independent chains run in parallel, so the elapsed time follows the
    /// longest chain rather than the sum of all durations. Tasks that wait on
    /// each other in a cycle never finish, and neither does this call.
    pub async fn run(&self, tasks: &TaskSet) -> RunReport {
        let run_id = Uuid::new_v4();
        let emitter = Arc::new(Emitter::new(run_id, self.sink.clone()));
        let registry = self.initialize(tasks);

        if self.config.warn_on_cycles {
            for cycle in tasks.dependency_cycles() {
                tracing::warn!(
                    "Tasks {:?} wait on each other and will never start",
                    cycle
                );
            }
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        emitter.emit(TaskEvent::RunStarted { tasks: tasks.len() });

        let mut pending: FuturesUnordered<_> = tasks
            .records()
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let started = Arc::new(OnceLock::new());
                let executor = TaskExecutor::new(record.clone(), registry.clone())
                    .with_workload(self.workload.clone())
                    .with_emitter(emitter.clone())
                    .with_start_marker(started.clone())
                    .with_time_unit(self.config.time_unit());
                tokio::spawn(executor.run()).map(move |joined| (idx, started, joined))
            })
            .collect();

        let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; tasks.len()];
        while let Some((idx, started, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => recover(
                    &tasks.records()[idx],
                    &registry,
                    &emitter,
                    started.get().copied(),
                    e,
                ),
            };
            outcomes[idx] = Some(outcome);
        }

        let outcomes: Vec<TaskOutcome> = outcomes.into_iter().flatten().collect();
        let elapsed = clock.elapsed();
        let failed = outcomes
            .iter()
            .filter(|o| o.state == TaskState::Failed)
            .count();
        emitter.emit(TaskEvent::RunFinished { elapsed, failed });

        RunReport {
            run_id,
            started_at,
            elapsed,
            outcomes,
        }
    }
}

/// The executor's tokio task died without returning an outcome. Fire its
/// signal on its behalf so dependents still terminate.
///
/// If the executor fired before dying, the stored value wins and the outcome
/// reports what dependents observed.
fn recover(
    record: &TaskRecord,
    registry: &SignalRegistry,
    emitter: &Emitter,
    started_at: Option<DateTime<Utc>>,
    err: JoinError,
) -> TaskOutcome {
    let message = if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        err.to_string()
    };
    tracing::error!("Executor for {} aborted: {}", record.name(), message);

    let aborted = Arc::new(TaskFailure::Aborted {
        task: record.name().to_string(),
        message,
    });

    let (signal, fired_here) = match registry.get(record.name()) {
        Some(own) => match own.set_failure(aborted.clone()) {
            Ok(()) => (Signal::Failure(aborted), true),
            Err(_) => match own.peek() {
                Some(stored) => (stored, false),
                None => (Signal::Failure(aborted), false),
            },
        },
        None => (Signal::Failure(aborted), true),
    };

    let state = if signal.is_success() {
        TaskState::Succeeded
    } else {
        TaskState::Failed
    };

    if fired_here {
        if let Some(cause) = signal.failure() {
            emitter.emit(TaskEvent::Failed {
                task: record.name().to_string(),
                cause: cause.clone(),
                ran: started_at.is_some(),
            });
        }
    }

    TaskOutcome {
        name: record.name().to_string(),
        state,
        failure: signal.failure().cloned(),
        missing_predecessor: None,
        ran: started_at.is_some(),
        started_at,
        finished_at: Utc::now(),
    }
}
