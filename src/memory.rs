// src/memory.rs

//! In-memory collaborators.
//!
//! Used by the diagnostic binary (which resolves against a recorded history
//! file) and by tests. All state sits behind a `Mutex`; none of these types
//! do any IO.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::build_cause::BuildCause;
use crate::health::{HealthLevel, HealthState, HealthStateId};
use crate::material::revision::sort_newest_first;
use crate::material::{
    DependencyRevision, Fingerprint, Material, MaterialRevisions, Modification,
};
use crate::ports::{HealthSink, RevisionStore, ScheduleQueue};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct StoreState {
    materials: HashMap<Fingerprint, Material>,
    /// Newest first.
    history: HashMap<Fingerprint, Vec<Modification>>,
    polled_at: HashMap<Fingerprint, DateTime<Utc>>,
    runs: HashMap<(String, u64), MaterialRevisions>,
    latest_cause: HashMap<String, (u64, BuildCause)>,
}

/// Revision store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRevisionStore {
    state: Mutex<StoreState>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that run `counter` of `pipeline` was built from `cause`.
    ///
    /// The cause becomes the pipeline's latest build cause if `counter` is
    /// the highest seen so far.
    pub fn record_run(&self, pipeline: &str, counter: u64, cause: BuildCause) {
        let mut state = lock(&self.state);
        state
            .runs
            .insert((pipeline.to_string(), counter), cause.revisions.clone());
        let newer = state
            .latest_cause
            .get(pipeline)
            .is_none_or(|(existing, _)| *existing <= counter);
        if newer {
            state
                .latest_cause
                .insert(pipeline.to_string(), (counter, cause));
        }
        debug!(pipeline = %pipeline, counter, "recorded pipeline run");
    }

    /// Record a passed stage of an upstream run as a modification of the
    /// matching dependency material.
    pub fn record_stage_passed(
        &self,
        pipeline: &str,
        counter: u64,
        stage: &str,
        stage_counter: u64,
        at: DateTime<Utc>,
    ) -> Result<Modification> {
        let material = Material::dependency(pipeline, stage);
        let revision = DependencyRevision::new(pipeline, counter, stage, stage_counter);
        let modification = Modification::new(revision.to_string(), at)
            .with_data("pipeline_counter", counter.to_string());
        self.record(&material, std::slice::from_ref(&modification))?;
        Ok(modification)
    }

    /// Convenience: record a run's revisions and its passing stage in one go.
    pub fn record_pipeline_run(
        &self,
        pipeline: &str,
        counter: u64,
        stage: &str,
        cause: BuildCause,
        at: DateTime<Utc>,
    ) -> Result<Modification> {
        self.record_run(pipeline, counter, cause);
        self.record_stage_passed(pipeline, counter, stage, 1, at)
    }

    pub fn material(&self, fingerprint: &str) -> Option<Material> {
        lock(&self.state).materials.get(fingerprint).cloned()
    }
}

impl RevisionStore for InMemoryRevisionStore {
    fn history(&self, fingerprint: &str, limit: usize) -> Result<Vec<Modification>> {
        let state = lock(&self.state);
        Ok(state
            .history
            .get(fingerprint)
            .map(|mods| mods.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn find_modification(&self, fingerprint: &str, revision: &str) -> Result<Option<Modification>> {
        let state = lock(&self.state);
        Ok(state
            .history
            .get(fingerprint)
            .and_then(|mods| mods.iter().find(|m| m.revision == revision).cloned()))
    }

    fn record(&self, material: &Material, modifications: &[Modification]) -> Result<()> {
        let fingerprint = material.fingerprint();
        let mut state = lock(&self.state);
        state
            .materials
            .entry(fingerprint.clone())
            .or_insert_with(|| material.clone());

        let known = state.history.entry(fingerprint.clone()).or_default();
        let mut added = 0usize;
        for modification in modifications {
            if known.iter().any(|m| m.revision == modification.revision) {
                continue;
            }
            known.push(modification.clone());
            added += 1;
        }
        sort_newest_first(material, known);

        if added > 0 {
            debug!(material = %material.display_name(), added, "recorded modifications");
        }
        Ok(())
    }

    fn mark_polled(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        lock(&self.state)
            .polled_at
            .insert(fingerprint.to_string(), at);
        Ok(())
    }

    fn last_polled_at(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.state).polled_at.get(fingerprint).copied())
    }

    fn run_revisions(&self, pipeline: &str, counter: u64) -> Result<Option<MaterialRevisions>> {
        Ok(lock(&self.state)
            .runs
            .get(&(pipeline.to_string(), counter))
            .cloned())
    }

    fn latest_build_cause(&self, pipeline: &str) -> Result<BuildCause> {
        Ok(lock(&self.state)
            .latest_cause
            .get(pipeline)
            .map(|(_, cause)| cause.clone())
            .unwrap_or_else(BuildCause::never_run))
    }
}

/// Scheduling queue that holds at most one pending cause per pipeline and
/// remembers everything ever scheduled.
#[derive(Debug, Default)]
pub struct InMemoryScheduleQueue {
    pending: Mutex<BTreeMap<String, BuildCause>>,
    scheduled: Mutex<Vec<(String, BuildCause)>>,
    refuse: Mutex<bool>,
}

impl InMemoryScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the pending cause of `pipeline`, as the scheduler
    /// does when it starts the run.
    pub fn take(&self, pipeline: &str) -> Option<BuildCause> {
        lock(&self.pending).remove(pipeline)
    }

    pub fn pending(&self, pipeline: &str) -> Option<BuildCause> {
        lock(&self.pending).get(pipeline).cloned()
    }

    /// Every cause accepted so far, in order.
    pub fn scheduled(&self) -> Vec<(String, BuildCause)> {
        lock(&self.scheduled).clone()
    }

    pub fn scheduled_for(&self, pipeline: &str) -> Vec<BuildCause> {
        lock(&self.scheduled)
            .iter()
            .filter(|(p, _)| p == pipeline)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Make subsequent `schedule` calls fail (simulates an unavailable queue).
    pub fn set_refusing(&self, refuse: bool) {
        *lock(&self.refuse) = refuse;
    }
}

impl ScheduleQueue for InMemoryScheduleQueue {
    fn has_pending(&self, pipeline: &str) -> bool {
        lock(&self.pending).contains_key(pipeline)
    }

    fn schedule(&self, pipeline: &str, cause: BuildCause) -> Result<()> {
        if *lock(&self.refuse) {
            return Err(anyhow!("schedule queue refused build cause for '{pipeline}'"));
        }
        if lock(&self.pending)
            .insert(pipeline.to_string(), cause.clone())
            .is_some()
        {
            info!(pipeline = %pipeline, "superseded pending build cause");
        }
        lock(&self.scheduled).push((pipeline.to_string(), cause));
        Ok(())
    }
}

/// Health sink that keeps the current state per id plus a full log.
#[derive(Debug, Default)]
pub struct RecordingHealthSink {
    current: Mutex<HashMap<HealthStateId, HealthState>>,
    log: Mutex<Vec<HealthState>>,
}

impl RecordingHealthSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, id: &HealthStateId) -> Option<HealthState> {
        lock(&self.current).get(id).cloned()
    }

    pub fn log(&self) -> Vec<HealthState> {
        lock(&self.log).clone()
    }

    pub fn errors_for(&self, pipeline: &str) -> Vec<HealthState> {
        lock(&self.log)
            .iter()
            .filter(|s| s.id.pipeline == pipeline && s.is_error())
            .cloned()
            .collect()
    }
}

impl HealthSink for RecordingHealthSink {
    fn update(&self, state: HealthState) {
        lock(&self.current).insert(state.id.clone(), state.clone());
        lock(&self.log).push(state);
    }
}

/// Health sink that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHealthSink;

impl HealthSink for TracingHealthSink {
    fn update(&self, state: HealthState) {
        match state.level {
            HealthLevel::Success => debug!(id = %state.id, "health: ok"),
            HealthLevel::Accepted => info!(id = %state.id, message = %state.message, "health: accepted"),
            HealthLevel::Error => error!(
                id = %state.id,
                message = %state.message,
                description = %state.description,
                "health: error"
            ),
        }
    }
}
