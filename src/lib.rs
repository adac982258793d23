//! # taskchain
//!
//! Runs a set of named, time-bounded tasks concurrently. A task may block on
//! exactly one other task and starts only after that task has finished,
//! whether it succeeded or failed.
//!
//! ```text
//! TaskSet ──► Coordinator::initialize ──► SignalRegistry (one signal per task)
//!                     │
//!                     ▼
//!        spawn TaskExecutor per record
//!            ├─ wait on predecessor's CompletionSignal (if any)
//!            ├─ run the workload for the task's duration
//!            └─ fire own CompletionSignal (success or failure)
//!                     │
//!                     ▼
//!        join barrier ──► RunReport { elapsed, outcomes }
//! ```
//!
//! A failing task fails all of its transitive dependents without running
//! them, and each of them still fires its signal. An unknown predecessor is
//! logged and ignored. Tasks that wait on each other in a cycle never start.
//!
//! ```rust,no_run
//! use taskchain::{Coordinator, RunConfig, TaskRecord, TaskSet};
//!
//! #[tokio::main]
//! async fn main() -> taskchain::Result<()> {
//!     let tasks = TaskSet::new(vec![
//!         TaskRecord::independent("A", 5)?,
//!         TaskRecord::new("B", 3, Some("A"))?,
//!         TaskRecord::new("C", 2, Some("Z"))?,
//!     ])?;
//!
//!     let report = Coordinator::new(RunConfig::default()).run(&tasks).await;
//!     println!("finished in {:?}", report.elapsed);
//!     Ok(())
//! }
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod telemetry;
}

pub mod coord;
pub mod loader;

// Re-exports for convenience
pub use crate::core::config::RunConfig;
pub use crate::core::errors::{ChainError, Result, SignalError};
pub use crate::core::telemetry::init_logging;
pub use coord::*;
