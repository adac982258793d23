//! Core types for dependency-gated execution
//!
//! Records describe tasks, the set validates them as a whole, and the
//! outcome/report types carry the results back out of a run.

use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::errors::{ChainError, Result};

/// Immutable description of one task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    name: String,
    duration_secs: u64,
    blocks_on: Option<String>,
}

impl TaskRecord {
    /// Create a validated record. An empty or whitespace-only `blocks_on`
    /// means the task has no predecessor.
    pub fn new(
        name: impl Into<String>,
        duration_secs: u64,
        blocks_on: Option<impl Into<String>>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ChainError::validation_field(
                "task name must not be empty",
                "name",
            ));
        }
        let blocks_on = blocks_on
            .map(Into::into)
            .filter(|p: &String| !p.trim().is_empty());
        Ok(Self {
            name,
            duration_secs,
            blocks_on,
        })
    }

    /// Shorthand for a record without a predecessor
    pub fn independent(name: impl Into<String>, duration_secs: u64) -> Result<Self> {
        Self::new(name, duration_secs, None::<String>)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Simulated work length for a given time unit.
    ///
    /// Counts above `u32::MAX` units are clamped, and the product saturates
    /// at `Duration::MAX`.
    pub fn duration(&self, unit: Duration) -> Duration {
        unit.saturating_mul(u32::try_from(self.duration_secs).unwrap_or(u32::MAX))
    }

    pub fn blocks_on(&self) -> Option<&str> {
        self.blocks_on.as_deref()
    }
}

/// Ordered collection of records with unique identities
#[derive(Clone, Debug, Default)]
pub struct TaskSet {
    records: Vec<TaskRecord>,
}

impl TaskSet {
    /// Build a set, rejecting duplicate identities.
    pub fn new(records: Vec<TaskRecord>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.name()) {
                return Err(ChainError::duplicate(record.name()));
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn get(&self, name: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Groups of tasks that wait on each other and can never start.
    ///
    /// Edges to unknown predecessors are ignored since those tasks run
    /// unblocked. A self-reference is reported as a one-element group.
    pub fn dependency_cycles(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = self
            .records
            .iter()
            .map(|r| (r.name(), graph.add_node(r.name())))
            .collect();

        for record in &self.records {
            if let Some(pred) = record.blocks_on().and_then(|p| index.get(p)) {
                graph.add_edge(*pred, index[record.name()], ());
            }
        }

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut names: Vec<String> =
                    scc.into_iter().map(|i| graph[i].to_string()).collect();
                names.sort_unstable();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }
}

/// Lifecycle state of a task executor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Waiting,
    Running,
    Succeeded,
    Failed,
}

/// Why a task ended in [`TaskState::Failed`]
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The workload returned an error
    #[error("task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    /// The workload panicked
    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    /// The predecessor failed, so this task never ran
    #[error("predecessor failed: {cause}")]
    Predecessor {
        task: String,
        predecessor: String,
        #[source]
        cause: Arc<TaskFailure>,
    },

    /// The executor itself died before reporting
    #[error("executor for '{task}' aborted: {message}")]
    Aborted { task: String, message: String },
}

impl TaskFailure {
    /// The task this failure belongs to
    pub fn task(&self) -> &str {
        match self {
            TaskFailure::Execution { task, .. }
            | TaskFailure::Panicked { task, .. }
            | TaskFailure::Predecessor { task, .. }
            | TaskFailure::Aborted { task, .. } => task,
        }
    }

    /// The failure that started the cascade
    pub fn root_cause(&self) -> &TaskFailure {
        let mut current = self;
        while let TaskFailure::Predecessor { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Task names from this task back to the origin of the failure
    pub fn chain(&self) -> Vec<&str> {
        let mut names = vec![self.task()];
        let mut current = self;
        while let TaskFailure::Predecessor { cause, .. } = current {
            names.push(cause.task());
            current = cause;
        }
        names
    }

    pub fn is_cascaded(&self) -> bool {
        matches!(self, TaskFailure::Predecessor { .. })
    }
}

/// Terminal value carried by a completion signal
#[derive(Clone, Debug)]
pub enum Signal {
    Success,
    Failure(Arc<TaskFailure>),
}

impl Signal {
    pub fn is_success(&self) -> bool {
        matches!(self, Signal::Success)
    }

    pub fn failure(&self) -> Option<&Arc<TaskFailure>> {
        match self {
            Signal::Success => None,
            Signal::Failure(cause) => Some(cause),
        }
    }
}

/// Result of one executor
#[derive(Clone, Debug, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub state: TaskState,
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<Arc<TaskFailure>>,
    /// Set when the named predecessor did not exist and the task ran unblocked
    pub missing_predecessor: Option<String>,
    /// Whether the task's own work was started
    pub ran: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

fn serialize_failure<S>(
    failure: &Option<Arc<TaskFailure>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match failure {
        Some(cause) => serializer.serialize_some(&cause.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Aggregate result of a run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One outcome per record, in input order
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == TaskState::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::succeeded)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
