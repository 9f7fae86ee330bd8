// src/producer/mod.rs

//! Build-cause producer.
//!
//! Sequences one trigger attempt for a pipeline:
//!
//! `Idle -> Triggered -> Polling -> Resolving -> {Scheduled | Failed} -> Idle`
//!
//! - [`schedule`] admits manual and timer triggers, dispatches material polls
//!   and waits on the update coordinator.
//! - [`produce`] turns the recorded material data into a [`BuildCause`] and
//!   hands it to the scheduling queue.
//!
//! Every exit path releases the pipeline's trigger marker through a
//! [`crate::trigger::TriggerGuard`].

pub mod produce;
pub mod schedule;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::build_cause::BuildCause;
use crate::errors::Result;
use crate::material::ExternalsSource;
use crate::ports::{
    Authorizer, ConfigProvider, HealthSink, MaterialPoller, RevisionStore, ScheduleQueue,
    SecretResolver,
};

pub use produce::BuildCauseProducer;
pub use schedule::ScheduleTicket;

/// Tunables for the producer, usually taken from the `[settings]` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Revisions walked back per upstream material during fan-in resolution.
    pub backtrack_limit: usize,
    /// How long to wait for all material polls of an attempt.
    pub poll_timeout: Duration,
    /// Re-poll materials without a poll since the attempt started before
    /// resolving.
    pub final_modification_check: bool,
    /// Nesting limit for material expansion.
    pub expansion_depth: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            backtrack_limit: 100,
            poll_timeout: Duration::from_secs(300),
            final_modification_check: true,
            expansion_depth: 4,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Material key (fingerprint, name or display name) to revision.
    pub specified_revisions: BTreeMap<String, String>,
    /// Poll every material before producing the build cause.
    pub perform_material_update: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            specified_revisions: BTreeMap::new(),
            perform_material_update: true,
        }
    }
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revision(mut self, material: impl Into<String>, revision: impl Into<String>) -> Self {
        self.specified_revisions
            .insert(material.into(), revision.into());
        self
    }

    pub fn without_material_update(mut self) -> Self {
        self.perform_material_update = false;
        self
    }
}

/// Who asked for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Timer-driven; only schedules when a material changed.
    Automatic,
    /// Forced by a user; schedules even without changes.
    Manual { actor: String },
}

impl Trigger {
    pub fn manual(actor: impl Into<String>) -> Self {
        Trigger::Manual {
            actor: actor.into(),
        }
    }
}

/// Non-error results of producing a build cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceOutcome {
    /// A build cause was handed to the scheduling queue.
    Scheduled(BuildCause),
    /// Nothing changed since the pipeline's previous build cause, or a
    /// material has no recorded revision yet.
    NoModifications,
    /// An automatic trigger found a build cause already waiting in the queue.
    AlreadyPending,
}

impl ProduceOutcome {
    pub fn build_cause(&self) -> Option<&BuildCause> {
        match self {
            ProduceOutcome::Scheduled(cause) => Some(cause),
            _ => None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, ProduceOutcome::Scheduled(_))
    }
}

/// Receives the final result of an asynchronous trigger attempt.
pub trait ResultSink: Send + Sync {
    fn report(&self, pipeline: &str, result: &Result<ProduceOutcome>);
}

/// Result sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResultSink;

impl ResultSink for NullResultSink {
    fn report(&self, pipeline: &str, result: &Result<ProduceOutcome>) {
        match result {
            Ok(outcome) => debug!(pipeline = %pipeline, ?outcome, "trigger attempt finished"),
            Err(err) => warn!(pipeline = %pipeline, error = %err, "trigger attempt failed"),
        }
    }
}

/// The external collaborators a producer works against.
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigProvider>,
    pub poller: Arc<dyn MaterialPoller>,
    pub store: Arc<dyn RevisionStore>,
    pub secrets: Arc<dyn SecretResolver>,
    pub authorizer: Arc<dyn Authorizer>,
    pub queue: Arc<dyn ScheduleQueue>,
    pub health: Arc<dyn HealthSink>,
    pub externals: Arc<dyn ExternalsSource>,
}
