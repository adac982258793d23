//! Workloads - what a task does once it is allowed to run
//!
//! The executor owns the lifecycle; a workload only performs the work for one
//! record and reports whether it went well.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::coord::types::TaskRecord;

/// Work performed by a running task
#[async_trait]
pub trait Workload: Send + Sync {
    /// Perform the work for `task`. `duration` is the record's length already
    /// scaled by the run's time unit.
    ///
    /// An `Err` (or a panic) marks the task as failed.
    async fn perform(&self, task: &TaskRecord, duration: Duration) -> anyhow::Result<()>;
}

/// Sleeps for the task's duration on the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedWork;

#[async_trait]
impl Workload for SimulatedWork {
    async fn perform(&self, _task: &TaskRecord, duration: Duration) -> anyhow::Result<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Runs an inner workload and then fails the named tasks.
pub struct FaultyWork {
    inner: Arc<dyn Workload>,
    failing: HashSet<String>,
}

impl FaultyWork {
    pub fn new<I, S>(failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::wrap(Arc::new(SimulatedWork), failing)
    }

    pub fn wrap<I, S>(inner: Arc<dyn Workload>, failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            failing: failing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fails(&self, name: &str) -> bool {
        self.failing.contains(name)
    }
}

#[async_trait]
impl Workload for FaultyWork {
    async fn perform(&self, task: &TaskRecord, duration: Duration) -> anyhow::Result<()> {
        self.inner.perform(task, duration).await?;
        if self.fails(task.name()) {
            anyhow::bail!("injected fault after {:?}", duration);
        }
        Ok(())
    }
}
