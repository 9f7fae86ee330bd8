// src/producer/schedule.rs

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{BuildCauseError, Result};
use crate::health::{HealthState, HealthStateId};
use crate::material::Material;
use crate::trigger::{PollOutcome, TriggerGuard, UpdateAttempt};

use super::produce::{BuildCauseProducer, poll_material};
use super::{ProduceOutcome, ResultSink, ScheduleOptions, Trigger};

/// Handle on an admitted trigger attempt running in the background.
#[derive(Debug)]
pub struct ScheduleTicket {
    pipeline: String,
    handle: JoinHandle<Result<ProduceOutcome>>,
}

impl ScheduleTicket {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the attempt to finish. The same result has already been
    /// passed to the attempt's result sink.
    pub async fn wait(self) -> Result<ProduceOutcome> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(BuildCauseError::Other(anyhow!(
                "trigger attempt for pipeline '{}' aborted: {err}",
                self.pipeline
            ))),
        }
    }
}

impl BuildCauseProducer {
    /// Admit a user-forced trigger and run it in the background.
    ///
    /// Unknown pipelines, missing permission and an attempt already in
    /// flight are rejected here, before anything is dispatched. The result
    /// of an admitted attempt goes to `sink`.
    pub fn manual_schedule(
        self: &Arc<Self>,
        pipeline: &str,
        actor: &str,
        options: ScheduleOptions,
        sink: Arc<dyn ResultSink>,
    ) -> Result<ScheduleTicket> {
        if !self.ports.config.has_pipeline(pipeline) {
            return Err(BuildCauseError::PipelineNotFound(pipeline.to_string()));
        }
        if !self.ports.authorizer.can_trigger(actor, pipeline) {
            warn!(pipeline = %pipeline, actor = %actor, "trigger refused: permission denied");
            return Err(BuildCauseError::PermissionDenied {
                actor: actor.to_string(),
                pipeline: pipeline.to_string(),
            });
        }

        let guard = self.monitor.acquire(pipeline)?;
        info!(pipeline = %pipeline, actor = %actor, "manual trigger admitted");
        Ok(self.spawn_attempt(guard, Trigger::manual(actor), options, sink))
    }

    /// Admit a timer-driven trigger. Schedules only if a material changed.
    pub fn timer_schedule(
        self: &Arc<Self>,
        pipeline: &str,
        sink: Arc<dyn ResultSink>,
    ) -> Result<ScheduleTicket> {
        if !self.ports.config.has_pipeline(pipeline) {
            return Err(BuildCauseError::PipelineNotFound(pipeline.to_string()));
        }

        let guard = self.monitor.acquire(pipeline)?;
        debug!(pipeline = %pipeline, "timer trigger admitted");
        Ok(self.spawn_attempt(guard, Trigger::Automatic, ScheduleOptions::default(), sink))
    }

    fn spawn_attempt(
        self: &Arc<Self>,
        guard: TriggerGuard,
        trigger: Trigger,
        options: ScheduleOptions,
        sink: Arc<dyn ResultSink>,
    ) -> ScheduleTicket {
        let this = Arc::clone(self);
        let pipeline = guard.pipeline().to_string();

        let handle = tokio::spawn(async move {
            // Held for the whole attempt; dropping it clears the trigger marker.
            let guard = guard;
            let pipeline = guard.pipeline().to_string();

            // Run in its own task so a panic still ends in a reported result.
            let attempt = {
                let this = Arc::clone(&this);
                let pipeline = pipeline.clone();
                tokio::spawn(async move { this.run_attempt(&pipeline, &trigger, &options).await })
            };
            let result = match attempt.await {
                Ok(result) => result,
                Err(err) => {
                    error!(pipeline = %pipeline, error = %err, "trigger attempt aborted");
                    let result = Err(BuildCauseError::Other(anyhow!(
                        "trigger attempt for pipeline '{pipeline}' aborted unexpectedly"
                    )));
                    this.report_scheduling(&pipeline, &result);
                    result
                }
            };
            drop(guard);

            sink.report(&pipeline, &result);
            result
        });

        ScheduleTicket { pipeline, handle }
    }

    async fn run_attempt(
        &self,
        pipeline: &str,
        trigger: &Trigger,
        options: &ScheduleOptions,
    ) -> Result<ProduceOutcome> {
        let started = Utc::now();

        if options.perform_material_update {
            match self.update_materials(pipeline).await {
                Ok(completed_at) => {
                    debug!(pipeline = %pipeline, %completed_at, "material update complete");
                    self.ports
                        .health
                        .update(HealthState::success(HealthStateId::material_update(pipeline)));
                }
                Err(err) => {
                    let (message, description) = err.health_message(pipeline);
                    self.ports.health.update(HealthState::error(
                        HealthStateId::material_update(pipeline),
                        message,
                        description,
                    ));
                    return Err(err);
                }
            }
        }

        self.produce_build_cause(pipeline, trigger, options, started)
            .await
    }

    /// Poll every expanded material concurrently and wait for all of them.
    /// Returns when the last poll reported.
    async fn update_materials(&self, pipeline: &str) -> Result<DateTime<Utc>> {
        let materials = self.expanded_materials(pipeline)?;

        let waiter = self.coordinator.register(
            pipeline,
            materials
                .iter()
                .map(|m| (m.fingerprint(), m.display_name())),
        )?;

        let attempt = waiter.attempt();
        debug!(
            pipeline = %pipeline,
            attempt = attempt.id(),
            count = materials.len(),
            "dispatching material polls"
        );
        for material in materials {
            self.dispatch_poll(&attempt, material);
        }

        let summary = self
            .coordinator
            .wait(waiter, self.settings.poll_timeout)
            .await
            .into_result()?;
        Ok(summary.completed_at)
    }

    fn dispatch_poll(&self, attempt: &UpdateAttempt, material: Material) {
        let ports = self.ports.clone();
        let coordinator = Arc::clone(&self.coordinator);
        let attempt = attempt.clone();

        tokio::spawn(async move {
            let fingerprint = material.fingerprint();
            let name = material.display_name();

            // Polled in its own task so a panicking poller still reports.
            let poll = tokio::spawn(async move { poll_material(&ports, &material).await });
            let outcome = match poll.await {
                Ok(Ok(new_modifications)) => PollOutcome::Updated { new_modifications },
                Ok(Err(err)) => PollOutcome::Failed {
                    material: name,
                    message: err.to_string(),
                },
                Err(err) => PollOutcome::Failed {
                    material: name,
                    message: format!("poll task aborted: {err}"),
                },
            };
            coordinator.complete(&attempt, &fingerprint, outcome);
        });
    }
}
