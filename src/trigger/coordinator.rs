// src/trigger/coordinator.rs

//! Join over the material polls of one trigger attempt.
//!
//! A pipeline registers the fingerprints it dispatched and gets back an
//! [`UpdateWaiter`]. Every poll reports exactly once through
//! [`UpdateCoordinator::complete`]; when the last outstanding poll reports,
//! the waiter's oneshot channel is resolved with an [`UpdateSummary`]. The
//! channel is resolved at most once whatever the arrival order, and only one
//! registration per pipeline may be live at a time.
//!
//! Each registration is a separate [`UpdateAttempt`]. Completions carry the
//! attempt they were dispatched for, so a poll that outlives an expired
//! attempt cannot land on the pipeline's next registration.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::{BuildCauseError, PollFailure, Result};
use crate::material::Fingerprint;

/// Result of all polls of one trigger attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub pipeline: String,
    /// Fingerprints that reported success.
    pub succeeded: Vec<Fingerprint>,
    pub failures: Vec<PollFailure>,
    /// Time of the completion that closed the barrier.
    pub completed_at: DateTime<Utc>,
}

impl UpdateSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(BuildCauseError::PollFailed {
                pipeline: self.pipeline,
                failures: self.failures,
            })
        }
    }
}

/// Outcome of a single material poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Updated { new_modifications: usize },
    Failed { material: String, message: String },
}

/// Identity of one registration: the pipeline plus a coordinator-unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateAttempt {
    pipeline: String,
    id: u64,
}

impl UpdateAttempt {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
struct PendingUpdate {
    attempt: u64,
    outstanding: BTreeSet<Fingerprint>,
    /// Display names for synthesized timeout failures.
    names: HashMap<Fingerprint, String>,
    succeeded: Vec<Fingerprint>,
    failures: Vec<PollFailure>,
    tx: Option<oneshot::Sender<UpdateSummary>>,
}

/// Handle for awaiting one pipeline's poll barrier.
#[derive(Debug)]
pub struct UpdateWaiter {
    attempt: UpdateAttempt,
    rx: oneshot::Receiver<UpdateSummary>,
}

impl UpdateWaiter {
    pub fn pipeline(&self) -> &str {
        &self.attempt.pipeline
    }

    /// Handle the dispatched polls report against.
    pub fn attempt(&self) -> UpdateAttempt {
        self.attempt.clone()
    }
}

#[derive(Debug, Default)]
pub struct UpdateCoordinator {
    pending: Mutex<HashMap<String, PendingUpdate>>,
    next_attempt: AtomicU64,
}

impl UpdateCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingUpdate>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the polls dispatched for `pipeline`.
    ///
    /// `materials` are `(fingerprint, display name)` pairs. With no
    /// materials the barrier is already closed.
    pub fn register<I>(&self, pipeline: &str, materials: I) -> Result<UpdateWaiter>
    where
        I: IntoIterator<Item = (Fingerprint, String)>,
    {
        let (tx, rx) = oneshot::channel();
        let names: HashMap<Fingerprint, String> = materials.into_iter().collect();
        let outstanding: BTreeSet<Fingerprint> = names.keys().cloned().collect();
        let attempt = UpdateAttempt {
            pipeline: pipeline.to_string(),
            id: self.next_attempt.fetch_add(1, Ordering::Relaxed),
        };

        let mut pending = self.pending();
        if pending.contains_key(pipeline) {
            return Err(BuildCauseError::ListenerAlreadyRegistered(pipeline.to_string()));
        }

        if outstanding.is_empty() {
            drop(pending);
            debug!(pipeline = %pipeline, attempt = attempt.id, "no materials to wait for");
            let _ = tx.send(UpdateSummary {
                pipeline: pipeline.to_string(),
                succeeded: Vec::new(),
                failures: Vec::new(),
                completed_at: Utc::now(),
            });
        } else {
            debug!(
                pipeline = %pipeline,
                attempt = attempt.id,
                count = outstanding.len(),
                "registered material update listener"
            );
            pending.insert(
                pipeline.to_string(),
                PendingUpdate {
                    attempt: attempt.id,
                    outstanding,
                    names,
                    succeeded: Vec::new(),
                    failures: Vec::new(),
                    tx: Some(tx),
                },
            );
        }

        Ok(UpdateWaiter { attempt, rx })
    }

    pub fn is_registered(&self, pipeline: &str) -> bool {
        self.pending().contains_key(pipeline)
    }

    /// Report one finished poll of `attempt`. Returns `true` if this report
    /// closed the barrier. Reports for an attempt that is no longer live are
    /// ignored.
    pub fn complete(
        &self,
        attempt: &UpdateAttempt,
        fingerprint: &str,
        outcome: PollOutcome,
    ) -> bool {
        self.complete_at(attempt, fingerprint, outcome, Utc::now())
    }

    pub fn complete_at(
        &self,
        attempt: &UpdateAttempt,
        fingerprint: &str,
        outcome: PollOutcome,
        at: DateTime<Utc>,
    ) -> bool {
        let pipeline = attempt.pipeline.as_str();
        let fired = {
            let mut pending = self.pending();
            let Some(update) = pending
                .get_mut(pipeline)
                .filter(|update| update.attempt == attempt.id)
            else {
                debug!(
                    pipeline = %pipeline,
                    attempt = attempt.id,
                    material = %fingerprint,
                    "poll completed for an attempt that is not live; ignoring"
                );
                return false;
            };

            if !update.outstanding.remove(fingerprint) {
                warn!(
                    pipeline = %pipeline,
                    material = %fingerprint,
                    "unexpected or repeated poll completion; ignoring"
                );
                return false;
            }

            match outcome {
                PollOutcome::Updated { new_modifications } => {
                    debug!(
                        pipeline = %pipeline,
                        material = %fingerprint,
                        new_modifications,
                        "material poll completed"
                    );
                    update.succeeded.push(fingerprint.to_string());
                }
                PollOutcome::Failed { material, message } => {
                    warn!(
                        pipeline = %pipeline,
                        material = %material,
                        error = %message,
                        "material poll failed"
                    );
                    update.failures.push(PollFailure {
                        fingerprint: fingerprint.to_string(),
                        material,
                        message,
                    });
                }
            }

            if update.outstanding.is_empty() {
                pending.remove(pipeline)
            } else {
                None
            }
        };

        match fired {
            Some(update) => {
                Self::fire(pipeline, update, at);
                true
            }
            None => false,
        }
    }

    /// Close the barrier for `attempt` now, recording every outstanding
    /// poll as failed. Returns `false` if the attempt was no longer live.
    pub fn expire(&self, attempt: &UpdateAttempt, reason: &str) -> bool {
        let pipeline = attempt.pipeline.as_str();
        let mut update = {
            let mut pending = self.pending();
            if pending.get(pipeline).map(|live| live.attempt) != Some(attempt.id) {
                return false;
            }
            match pending.remove(pipeline) {
                Some(update) => update,
                None => return false,
            }
        };

        for fingerprint in std::mem::take(&mut update.outstanding) {
            let material = update
                .names
                .get(&fingerprint)
                .cloned()
                .unwrap_or_else(|| fingerprint.clone());
            update.failures.push(PollFailure {
                fingerprint,
                material,
                message: reason.to_string(),
            });
        }

        warn!(
            pipeline = %pipeline,
            attempt = attempt.id,
            failed = update.failures.len(),
            "expiring material update listener"
        );
        Self::fire(pipeline, update, Utc::now());
        true
    }

    /// Wait until every poll has reported, or until `timeout` elapses, in
    /// which case the outstanding polls are recorded as failed.
    pub async fn wait(&self, waiter: UpdateWaiter, timeout: Duration) -> UpdateSummary {
        let UpdateWaiter { attempt, mut rx } = waiter;
        let pipeline = attempt.pipeline.clone();

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(_)) => {
                warn!(pipeline = %pipeline, "material update listener dropped before completion");
                Self::dropped_summary(pipeline)
            }
            Err(_) => {
                info!(
                    pipeline = %pipeline,
                    timeout_secs = timeout.as_secs(),
                    "material update timed out"
                );
                self.expire(&attempt, "timed out waiting for material update");
                match rx.await {
                    Ok(summary) => summary,
                    Err(_) => Self::dropped_summary(pipeline),
                }
            }
        }
    }

    fn dropped_summary(pipeline: String) -> UpdateSummary {
        UpdateSummary {
            pipeline: pipeline.clone(),
            succeeded: Vec::new(),
            failures: vec![PollFailure {
                fingerprint: String::new(),
                material: pipeline,
                message: "material update listener was dropped".to_string(),
            }],
            completed_at: Utc::now(),
        }
    }

    fn fire(pipeline: &str, mut update: PendingUpdate, at: DateTime<Utc>) {
        let summary = UpdateSummary {
            pipeline: pipeline.to_string(),
            succeeded: std::mem::take(&mut update.succeeded),
            failures: std::mem::take(&mut update.failures),
            completed_at: at,
        };
        info!(
            pipeline = %pipeline,
            succeeded = summary.succeeded.len(),
            failed = summary.failures.len(),
            "all material updates reported"
        );
        if let Some(tx) = update.tx.take() {
            if tx.send(summary).is_err() {
                debug!(pipeline = %pipeline, "material update waiter already gone");
            }
        }
    }
}
