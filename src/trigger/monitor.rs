// src/trigger/monitor.rs

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::{BuildCauseError, Result};

/// Set of pipelines with a trigger attempt in flight.
///
/// At most one attempt per pipeline is admitted at a time. Nothing here ever
/// waits: a second attempt is rejected immediately.
#[derive(Debug, Default)]
pub struct TriggerMonitor {
    triggered: Mutex<HashSet<String>>,
}

impl TriggerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.triggered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `pipeline` as triggered, failing if it already is.
    pub fn mark_as_triggered(&self, pipeline: &str) -> Result<()> {
        if self.set().insert(pipeline.to_string()) {
            debug!(pipeline = %pipeline, "marked pipeline as triggered");
            Ok(())
        } else {
            Err(BuildCauseError::AlreadyTriggered(pipeline.to_string()))
        }
    }

    pub fn clear(&self, pipeline: &str) {
        if self.set().remove(pipeline) {
            debug!(pipeline = %pipeline, "cleared trigger marker");
        }
    }

    pub fn is_triggered(&self, pipeline: &str) -> bool {
        self.set().contains(pipeline)
    }

    /// Mark `pipeline` and return a guard that clears the marker when
    /// dropped, including during unwinding.
    pub fn acquire(self: &Arc<Self>, pipeline: &str) -> Result<TriggerGuard> {
        self.mark_as_triggered(pipeline)?;
        Ok(TriggerGuard {
            monitor: Arc::clone(self),
            pipeline: pipeline.to_string(),
        })
    }
}

/// Scoped trigger marker; see [`TriggerMonitor::acquire`].
#[derive(Debug)]
pub struct TriggerGuard {
    monitor: Arc<TriggerMonitor>,
    pipeline: String,
}

impl TriggerGuard {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        self.monitor.clear(&self.pipeline);
    }
}
