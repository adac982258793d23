//! Dependency-gated concurrent execution
//!
//! Each task waits on at most one predecessor's completion signal, runs, and
//! fires its own signal. Failures cascade down the chain as data so every task
//! terminates.

pub mod action;
pub mod coordinator;
pub mod events;
pub mod executor;
pub mod signal;
pub mod types;

pub use action::*;
pub use coordinator::*;
pub use events::*;
pub use executor::*;
pub use signal::*;
pub use types::*;
