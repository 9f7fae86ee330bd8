// src/producer/produce.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::build_cause::BuildCause;
use crate::errors::{BuildCauseError, PollFailure, Result};
use crate::fanin::FanInResolver;
use crate::health::{HealthState, HealthStateId};
use crate::material::{Fingerprint, Material, MaterialExpander, Modification};
use crate::trigger::{TriggerMonitor, UpdateCoordinator};

use super::{Collaborators, ProduceOutcome, ProducerSettings, ScheduleOptions, Trigger};

/// Top-level orchestrator for trigger attempts.
///
/// Owns the trigger monitor, the update coordinator and the expansion cache;
/// all of them are shared by every pipeline handled by this producer.
pub struct BuildCauseProducer {
    pub(super) ports: Collaborators,
    pub(super) settings: ProducerSettings,
    pub(super) monitor: Arc<TriggerMonitor>,
    pub(super) coordinator: Arc<UpdateCoordinator>,
    pub(super) expander: MaterialExpander,
}

impl BuildCauseProducer {
    pub fn new(ports: Collaborators, settings: ProducerSettings) -> Arc<Self> {
        Self::with_monitor(ports, settings, Arc::new(TriggerMonitor::new()))
    }

    /// Like [`BuildCauseProducer::new`], sharing an existing trigger monitor.
    pub fn with_monitor(
        ports: Collaborators,
        settings: ProducerSettings,
        monitor: Arc<TriggerMonitor>,
    ) -> Arc<Self> {
        let expander = MaterialExpander::new(Arc::clone(&ports.externals), settings.expansion_depth);
        Arc::new(Self {
            ports,
            settings,
            monitor,
            coordinator: Arc::new(UpdateCoordinator::new()),
            expander,
        })
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    pub fn monitor(&self) -> &Arc<TriggerMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<UpdateCoordinator> {
        &self.coordinator
    }

    pub fn expander(&self) -> &MaterialExpander {
        &self.expander
    }

    /// Resolve the pipeline's revision set from recorded material data and
    /// hand the resulting build cause to the scheduling queue.
    ///
    /// `known_as_of` is when the attempt started; with the final
    /// modification check enabled, materials not polled since then are polled
    /// again first. The outcome is also reported to the health sink.
    pub async fn produce_build_cause(
        &self,
        pipeline: &str,
        trigger: &Trigger,
        options: &ScheduleOptions,
        known_as_of: DateTime<Utc>,
    ) -> Result<ProduceOutcome> {
        let result = self.produce(pipeline, trigger, options, known_as_of).await;
        self.report_scheduling(pipeline, &result);
        result
    }

    async fn produce(
        &self,
        pipeline: &str,
        trigger: &Trigger,
        options: &ScheduleOptions,
        known_as_of: DateTime<Utc>,
    ) -> Result<ProduceOutcome> {
        let materials = self.expanded_materials(pipeline)?;

        if self.settings.final_modification_check {
            self.final_modification_check(pipeline, &materials, known_as_of)
                .await?;
        }

        let pinned = self.pinned_revisions(pipeline, &materials, &options.specified_revisions)?;
        let histories = self.histories(&materials)?;

        if let Some(material) = materials.iter().find(|m| {
            let fingerprint = m.fingerprint();
            !pinned.contains_key(&fingerprint)
                && histories.get(&fingerprint).is_none_or(Vec::is_empty)
        }) {
            info!(
                pipeline = %pipeline,
                material = %material.display_name(),
                "material has no recorded revisions yet; nothing to schedule"
            );
            return Ok(ProduceOutcome::NoModifications);
        }

        let resolver = FanInResolver::new(
            self.ports.config.as_ref(),
            self.ports.store.as_ref(),
            self.settings.backtrack_limit,
        );
        let mut revisions = resolver.resolve(pipeline, &materials, &histories, &pinned)?;

        let previous = self.ports.store.latest_build_cause(pipeline)?;
        if previous.is_never_run() {
            debug!(pipeline = %pipeline, "pipeline has never run; every material counts as changed");
        }
        revisions.mark_changes_since(&previous.revisions);

        let cause = match trigger {
            Trigger::Automatic => {
                if !revisions.any_changed() {
                    debug!(pipeline = %pipeline, "no material changed since the previous build cause");
                    return Ok(ProduceOutcome::NoModifications);
                }
                if self.ports.queue.has_pending(pipeline) {
                    info!(pipeline = %pipeline, "build cause already pending; skipping automatic trigger");
                    return Ok(ProduceOutcome::AlreadyPending);
                }
                BuildCause::automatic(revisions)
            }
            Trigger::Manual { actor } => BuildCause::manual(revisions, actor, !pinned.is_empty()),
        };

        let cause = match self.materials_updated_at(&materials)? {
            Some(at) => cause.with_materials_updated_at(at),
            None => cause,
        };

        self.ports.queue.schedule(pipeline, cause.clone())?;
        info!(
            pipeline = %pipeline,
            kind = %cause.kind,
            approver = %cause.approver,
            materials = cause.revisions.len(),
            "scheduled build cause"
        );
        Ok(ProduceOutcome::Scheduled(cause))
    }

    pub(super) fn expanded_materials(&self, pipeline: &str) -> Result<Vec<Material>> {
        let declared = self
            .ports
            .config
            .materials_of(pipeline)
            .ok_or_else(|| BuildCauseError::PipelineNotFound(pipeline.to_string()))?;
        self.expander.expand_all(&declared)
    }

    async fn final_modification_check(
        &self,
        pipeline: &str,
        materials: &[Material],
        known_as_of: DateTime<Utc>,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for material in materials {
            let fingerprint = material.fingerprint();
            let fresh = self
                .ports
                .store
                .last_polled_at(&fingerprint)?
                .is_some_and(|at| at >= known_as_of);
            if fresh {
                continue;
            }

            debug!(
                pipeline = %pipeline,
                material = %material.display_name(),
                "material not polled during this attempt; checking for modifications"
            );
            if let Err(err) = poll_material(&self.ports, material).await {
                failures.push(PollFailure {
                    fingerprint,
                    material: material.display_name(),
                    message: err.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BuildCauseError::PollFailed {
                pipeline: pipeline.to_string(),
                failures,
            })
        }
    }

    fn pinned_revisions(
        &self,
        pipeline: &str,
        materials: &[Material],
        specified: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<Fingerprint, Modification>> {
        let mut pinned = BTreeMap::new();
        for (key, revision) in specified {
            let revision = revision.trim();
            if revision.is_empty() {
                continue;
            }

            let invalid = |material: String| BuildCauseError::InvalidSpecifiedRevision {
                pipeline: pipeline.to_string(),
                material,
                revision: revision.to_string(),
            };

            let Some(material) = materials.iter().find(|m| m.matches_key(key)) else {
                warn!(pipeline = %pipeline, material = %key, "pinned revision for unknown material");
                return Err(invalid(key.clone()));
            };

            let fingerprint = material.fingerprint();
            let Some(modification) = self.ports.store.find_modification(&fingerprint, revision)? else {
                warn!(
                    pipeline = %pipeline,
                    material = %material.display_name(),
                    revision = %revision,
                    "pinned revision not found in material history"
                );
                return Err(invalid(material.display_name()));
            };

            debug!(
                pipeline = %pipeline,
                material = %material.display_name(),
                revision = %revision,
                "using pinned revision"
            );
            pinned.insert(fingerprint, modification);
        }
        Ok(pinned)
    }

    fn histories(&self, materials: &[Material]) -> Result<BTreeMap<Fingerprint, Vec<Modification>>> {
        let mut histories = BTreeMap::new();
        for material in materials {
            let fingerprint = material.fingerprint();
            let history = self
                .ports
                .store
                .history(&fingerprint, self.settings.backtrack_limit)?;
            histories.insert(fingerprint, history);
        }
        Ok(histories)
    }

    /// Oldest successful poll across `materials`: the time from which all of
    /// them were known to be current.
    fn materials_updated_at(&self, materials: &[Material]) -> Result<Option<DateTime<Utc>>> {
        let mut oldest: Option<DateTime<Utc>> = None;
        for material in materials {
            match self.ports.store.last_polled_at(&material.fingerprint())? {
                Some(at) => oldest = Some(oldest.map_or(at, |o| o.min(at))),
                None => return Ok(None),
            }
        }
        Ok(oldest)
    }

    pub(super) fn report_scheduling(&self, pipeline: &str, result: &Result<ProduceOutcome>) {
        let id = HealthStateId::scheduling(pipeline);
        match result {
            Ok(ProduceOutcome::Scheduled(cause)) => {
                self.ports
                    .health
                    .update(HealthState::accepted(id, cause.message.clone()));
            }
            Ok(_) => self.ports.health.update(HealthState::success(id)),
            Err(err) => {
                if !err.is_rejection() {
                    error!(pipeline = %pipeline, error = ?err, "failed to produce build cause");
                }
                let (message, description) = err.health_message(pipeline);
                self.ports
                    .health
                    .update(HealthState::error(id, message, description));
            }
        }
    }
}

/// Poll one material for modifications newer than its latest recorded one,
/// record them and stamp the poll time. Returns how many were new.
pub(super) async fn poll_material(ports: &Collaborators, material: &Material) -> Result<usize> {
    let fingerprint = material.fingerprint();
    let since = ports.store.history(&fingerprint, 1)?.into_iter().next();

    let resolved = if material.has_secret_params() {
        ports.secrets.resolve(material).map_err(|err| {
            BuildCauseError::Secret(format!("{}: {err:#}", material.display_name()))
        })?
    } else {
        material.clone()
    };

    let found = ports
        .poller
        .modifications_since(&resolved, since.as_ref())
        .await?;

    // Recorded under the unresolved material so secrets never reach the store.
    ports.store.record(material, &found)?;
    ports.store.mark_polled(&fingerprint, Utc::now())?;
    Ok(found.len())
}
