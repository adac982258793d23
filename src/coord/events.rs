//! Lifecycle events emitted during a run
//!
//! Executors and the coordinator describe what happens as [`TaskEvent`]s and
//! hand them to an [`EventSink`]. Sinks decide how to present them: the
//! [`LoggingEventSink`] writes through `tracing`, the [`BufferingEventSink`]
//! keeps them for inspection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::coord::types::TaskFailure;

/// Something that happened to a task or to the run
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    RunStarted {
        tasks: usize,
    },
    /// The task is suspended on its predecessor's signal
    Waiting {
        task: String,
        predecessor: String,
    },
    /// The named predecessor does not exist; the task runs unblocked
    PredecessorMissing {
        task: String,
        predecessor: String,
    },
    Started {
        task: String,
        duration: Duration,
    },
    Succeeded {
        task: String,
        elapsed: Duration,
    },
    Failed {
        task: String,
        #[serde(serialize_with = "serialize_cause")]
        cause: Arc<TaskFailure>,
        /// Whether the task's own work had started
        ran: bool,
    },
    RunFinished {
        elapsed: Duration,
        failed: usize,
    },
}

impl TaskEvent {
    /// Task the event refers to, if any
    pub fn task(&self) -> Option<&str> {
        match self {
            TaskEvent::Waiting { task, .. }
            | TaskEvent::PredecessorMissing { task, .. }
            | TaskEvent::Started { task, .. }
            | TaskEvent::Succeeded { task, .. }
            | TaskEvent::Failed { task, .. } => Some(task),
            TaskEvent::RunStarted { .. } | TaskEvent::RunFinished { .. } => None,
        }
    }
}

fn serialize_cause<S>(cause: &Arc<TaskFailure>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&cause.to_string())
}

/// Event with run metadata
#[derive(Clone, Debug, Serialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: TaskEvent,
}

/// Receives lifecycle events. Called concurrently from every executor.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &EventEnvelope);
}

/// Renders events as log lines
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        match &envelope.event {
            TaskEvent::RunStarted { tasks } => {
                tracing::info!(run_id = %envelope.run_id, "Starting run with {} tasks", tasks);
            }
            TaskEvent::Waiting { task, predecessor } => {
                tracing::info!("Task {} waiting for {}", task, predecessor);
            }
            TaskEvent::PredecessorMissing { task, predecessor } => {
                tracing::warn!(
                    "Task {} blocks on unknown task {}; starting without it",
                    task,
                    predecessor
                );
            }
            TaskEvent::Started { task, duration } => {
                tracing::info!("Starting {} ({:?})", task, duration);
            }
            TaskEvent::Succeeded { task, elapsed } => {
                tracing::info!("Completed {} in {:?}", task, elapsed);
            }
            TaskEvent::Failed { task, cause, ran } => {
                tracing::error!(task = %task, ran = ran, "Task failed: {}", cause);
            }
            TaskEvent::RunFinished { elapsed, failed } => {
                tracing::info!(
                    run_id = %envelope.run_id,
                    "All tasks finished in {:?} ({} failed)",
                    elapsed,
                    failed
                );
            }
        }
    }
}

/// Collects envelopes in memory
#[derive(Debug, Default)]
pub struct BufferingEventSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<EventEnvelope> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events for one task, in emission order
    pub fn events_for(&self, task: &str) -> Vec<TaskEvent> {
        self.get_events()
            .into_iter()
            .filter(|e| e.event.task() == Some(task))
            .map(|e| e.event)
            .collect()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        match self.events.lock() {
            Ok(mut events) => events.push(envelope.clone()),
            Err(poisoned) => poisoned.into_inner().push(envelope.clone()),
        }
    }
}

/// Sink that forwards to several sinks
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.add_sink(sink);
        self
    }
}

impl EventSink for CompositeEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        for sink in &self.sinks {
            sink.emit(envelope);
        }
    }
}

/// Stamps events for one run and forwards them to the sink
pub(crate) struct Emitter {
    run_id: Uuid,
    sequence: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Emitter {
    pub(crate) fn new(run_id: Uuid, sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id,
            sequence: AtomicU64::new(0),
            sink,
        }
    }

    pub(crate) fn emit(&self, event: TaskEvent) {
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            run_id: self.run_id,
            timestamp: Utc::now(),
            event,
        };
        self.sink.emit(&envelope);
    }
}
