// src/history.rs

//! Recorded-history fixture for the diagnostic binary.
//!
//! Lets a build cause be resolved offline from a TOML description of what the
//! material pollers and upstream runs produced so far:
//!
//! ```toml
//! [[modification]]
//! pipeline = "build"          # pipeline that declares the material
//! material = "repo"           # material name, display name or fingerprint
//! revision = "a1b2c3"
//! modified_time = "2026-01-10T09:00:00Z"
//! author = "alice"
//!
//! [[run]]
//! pipeline = "upstream"
//! counter = 4
//! stage = "package"
//! completed_at = "2026-01-10T09:30:00Z"
//! revisions = { repo = "a1b2c3" }
//! ```
//!
//! Runs are applied in file order after all modifications, so a run may
//! refer to an upstream run listed before it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::build_cause::BuildCause;
use crate::errors::{BuildCauseError, Result};
use crate::material::{Material, MaterialRevision, MaterialRevisions, Modification};
use crate::memory::InMemoryRevisionStore;
use crate::ports::{ConfigProvider, RevisionStore};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFile {
    #[serde(default)]
    pub modification: Vec<RecordedModification>,
    #[serde(default)]
    pub run: Vec<RecordedRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedModification {
    pub pipeline: String,
    pub material: String,
    pub revision: String,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedRun {
    pub pipeline: String,
    pub counter: u64,
    pub stage: String,
    #[serde(default = "default_stage_counter")]
    pub stage_counter: u64,
    pub completed_at: DateTime<Utc>,
    /// Material key to the revision the run was built from.
    #[serde(default)]
    pub revisions: BTreeMap<String, String>,
}

fn default_stage_counter() -> u64 {
    1
}

pub fn load_history(path: impl AsRef<Path>) -> Result<HistoryFile> {
    let contents = fs::read_to_string(path)?;
    let history: HistoryFile = toml::from_str(&contents)?;
    Ok(history)
}

impl HistoryFile {
    /// Record everything in the fixture into `store`.
    pub fn apply(&self, config: &dyn ConfigProvider, store: &InMemoryRevisionStore) -> Result<()> {
        for entry in &self.modification {
            let material = find_material(config, &entry.pipeline, &entry.material)?;
            let mut modification = Modification::new(entry.revision.clone(), entry.modified_time);
            if let Some(author) = &entry.author {
                modification = modification.with_author(author.clone());
            }
            if let Some(comment) = &entry.comment {
                modification = modification.with_comment(comment.clone());
            }
            store.record(&material, std::slice::from_ref(&modification))?;
            store.mark_polled(&material.fingerprint(), entry.modified_time)?;
        }

        for run in &self.run {
            let mut revisions = MaterialRevisions::new();
            for (key, revision) in &run.revisions {
                let material = find_material(config, &run.pipeline, key)?;
                let modification = store
                    .find_modification(&material.fingerprint(), revision)?
                    .ok_or_else(|| {
                        BuildCauseError::ConfigError(format!(
                            "run {}/{} refers to unknown revision '{revision}' of material '{key}'",
                            run.pipeline, run.counter
                        ))
                    })?;
                revisions.push(MaterialRevision::new(material, modification))?;
            }

            store.record_run(&run.pipeline, run.counter, BuildCause::automatic(revisions));
            store.record_stage_passed(
                &run.pipeline,
                run.counter,
                &run.stage,
                run.stage_counter,
                run.completed_at,
            )?;
            debug!(pipeline = %run.pipeline, counter = run.counter, "applied recorded run");
        }
        Ok(())
    }
}

fn find_material(config: &dyn ConfigProvider, pipeline: &str, key: &str) -> Result<Material> {
    config
        .materials_of(pipeline)
        .ok_or_else(|| BuildCauseError::PipelineNotFound(pipeline.to_string()))?
        .into_iter()
        .find(|m| m.matches_key(key))
        .ok_or_else(|| {
            BuildCauseError::ConfigError(format!(
                "pipeline '{pipeline}' has no material '{key}'"
            ))
        })
}
