// src/ports.rs

//! Collaborator interfaces consumed by the build-cause core.
//!
//! The core never talks to a version-control client, database or HTTP layer
//! directly; it only sees these traits. Production wiring supplies real
//! implementations, while [`crate::memory`] and the test utilities provide
//! in-process ones.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::build_cause::BuildCause;
use crate::health::HealthState;
use crate::material::{Material, MaterialRevisions, Modification};

/// Boxed future returned by async collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Supplies each pipeline's ordered material list.
///
/// The configuration behind it is assumed to be validated (dependency edges
/// acyclic, upstream pipelines present).
pub trait ConfigProvider: Send + Sync {
    fn materials_of(&self, pipeline: &str) -> Option<Vec<Material>>;

    fn has_pipeline(&self, pipeline: &str) -> bool {
        self.materials_of(pipeline).is_some()
    }
}

/// Fetches modifications from the source behind a material.
pub trait MaterialPoller: Send + Sync {
    /// Modifications newer than `since`, newest first.
    ///
    /// With `since = None` the implementation returns the latest
    /// modification only.
    fn modifications_since<'a>(
        &'a self,
        material: &'a Material,
        since: Option<&'a Modification>,
    ) -> BoxFuture<'a, Result<Vec<Modification>>>;
}

/// Previously recorded modifications and pipeline runs.
pub trait RevisionStore: Send + Sync {
    /// Recorded modifications of a material, newest first, at most `limit`.
    fn history(&self, fingerprint: &str, limit: usize) -> Result<Vec<Modification>>;

    /// A specific recorded revision of a material.
    fn find_modification(&self, fingerprint: &str, revision: &str) -> Result<Option<Modification>>;

    /// Persist newly observed modifications; already known revisions are
    /// ignored.
    fn record(&self, material: &Material, modifications: &[Modification]) -> Result<()>;

    /// Remember that `fingerprint` was successfully polled at `at`.
    fn mark_polled(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()>;

    fn last_polled_at(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>>;

    /// Revisions that run `counter` of `pipeline` was built from.
    fn run_revisions(&self, pipeline: &str, counter: u64) -> Result<Option<MaterialRevisions>>;

    /// The build cause of the pipeline's most recent run, or
    /// [`BuildCause::never_run`] if it has not run yet.
    fn latest_build_cause(&self, pipeline: &str) -> Result<BuildCause>;
}

/// Substitutes secret placeholders in a material's configuration.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, material: &Material) -> Result<Material>;
}

/// Decides whether an actor may trigger a pipeline.
pub trait Authorizer: Send + Sync {
    fn can_trigger(&self, actor: &str, pipeline: &str) -> bool;
}

/// Sink for accepted build causes.
pub trait ScheduleQueue: Send + Sync {
    fn has_pending(&self, pipeline: &str) -> bool;

    /// Queue `cause`, replacing any pending cause for the same pipeline.
    fn schedule(&self, pipeline: &str, cause: BuildCause) -> Result<()>;
}

/// Receives user-visible status updates.
pub trait HealthSink: Send + Sync {
    fn update(&self, state: HealthState);
}

/// Authorizer that lets everyone trigger everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_trigger(&self, _actor: &str, _pipeline: &str) -> bool {
        true
    }
}
