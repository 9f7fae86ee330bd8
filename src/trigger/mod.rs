// src/trigger/mod.rs

//! Concurrency gatekeeping for trigger attempts.
//!
//! - [`monitor`] admits at most one in-flight attempt per pipeline.
//! - [`coordinator`] waits for all material polls of an attempt before the
//!   build cause is produced.

pub mod coordinator;
pub mod monitor;

pub use coordinator::{
    PollOutcome, UpdateAttempt, UpdateCoordinator, UpdateSummary, UpdateWaiter,
};
pub use monitor::{TriggerGuard, TriggerMonitor};
