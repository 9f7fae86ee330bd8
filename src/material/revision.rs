// src/material/revision.rs

//! Material revisions and consistent revision sets.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{BuildCauseError, Result};
use crate::material::{Fingerprint, Material, Modification};

/// Parsed dependency revision: `pipeline/counter/stage/stage_counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyRevision {
    pub pipeline: String,
    pub pipeline_counter: u64,
    pub stage: String,
    pub stage_counter: u64,
}

impl DependencyRevision {
    pub fn new(
        pipeline: impl Into<String>,
        pipeline_counter: u64,
        stage: impl Into<String>,
        stage_counter: u64,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            pipeline_counter,
            stage: stage.into(),
            stage_counter,
        }
    }
}

impl fmt::Display for DependencyRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.pipeline, self.pipeline_counter, self.stage, self.stage_counter
        )
    }
}

impl FromStr for DependencyRevision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let [pipeline, counter, stage, stage_counter] = parts.as_slice() else {
            return Err(format!(
                "invalid dependency revision '{s}' (expected pipeline/counter/stage/counter)"
            ));
        };
        let pipeline_counter = counter
            .parse::<u64>()
            .map_err(|_| format!("invalid pipeline counter in dependency revision '{s}'"))?;
        let stage_counter = stage_counter
            .parse::<u64>()
            .map_err(|_| format!("invalid stage counter in dependency revision '{s}'"))?;
        if pipeline.is_empty() || stage.is_empty() {
            return Err(format!("empty pipeline or stage in dependency revision '{s}'"));
        }
        Ok(Self::new(*pipeline, pipeline_counter, *stage, stage_counter))
    }
}

/// Orderable position of a modification within its material's history.
///
/// Two keys are only compared when they belong to the same material, so the
/// variant always matches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RevisionKey {
    Pipeline { counter: u64, stage_counter: u64 },
    Change { at: DateTime<Utc>, revision: String },
}

impl RevisionKey {
    pub fn of(material: &Material, modification: &Modification) -> Self {
        if material.is_dependency() {
            if let Ok(dep) = modification.revision.parse::<DependencyRevision>() {
                return RevisionKey::Pipeline {
                    counter: dep.pipeline_counter,
                    stage_counter: dep.stage_counter,
                };
            }
        }
        RevisionKey::Change {
            at: modification.modified_time,
            revision: modification.revision.clone(),
        }
    }

    pub fn revision_label(&self) -> String {
        match self {
            RevisionKey::Pipeline {
                counter,
                stage_counter,
            } => format!("{counter}/{stage_counter}"),
            RevisionKey::Change { revision, .. } => revision.clone(),
        }
    }
}

/// Sort a modification list newest first for the given material.
pub fn sort_newest_first(material: &Material, modifications: &mut [Modification]) {
    modifications.sort_by(|a, b| {
        RevisionKey::of(material, b).cmp(&RevisionKey::of(material, a))
    });
}

/// A material together with the modifications it advanced to, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialRevision {
    pub material: Material,
    modifications: Vec<Modification>,
    /// Whether this material moved since the pipeline's previous build cause.
    pub changed: bool,
}

impl MaterialRevision {
    pub fn new(material: Material, modification: Modification) -> Self {
        Self {
            material,
            modifications: vec![modification],
            changed: false,
        }
    }

    /// Returns `None` when `modifications` is empty.
    pub fn with_modifications(material: Material, modifications: Vec<Modification>) -> Option<Self> {
        if modifications.is_empty() {
            return None;
        }
        Some(Self {
            material,
            modifications,
            changed: false,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn latest_modification(&self) -> &Modification {
        &self.modifications[0]
    }

    pub fn latest_revision(&self) -> &str {
        &self.latest_modification().revision
    }

    pub fn latest_key(&self) -> RevisionKey {
        RevisionKey::of(&self.material, self.latest_modification())
    }

    /// Same material fingerprint and same latest revision.
    pub fn is_equivalent(&self, other: &MaterialRevision) -> bool {
        self.fingerprint() == other.fingerprint() && self.latest_revision() == other.latest_revision()
    }

    /// Keep only the modifications newer than `previous_revision`; the latest
    /// modification is always kept. With no previous revision (or one that
    /// is not in the list) only the latest modification is kept.
    pub fn retain_newer_than(&mut self, previous_revision: Option<&str>) {
        let keep = previous_revision
            .and_then(|prev| self.modifications.iter().position(|m| m.revision == prev))
            .unwrap_or(1)
            .max(1);
        self.modifications.truncate(keep);
    }

    pub fn latest_modified_time(&self) -> DateTime<Utc> {
        self.latest_modification().modified_time
    }
}

/// Ordered revision set with at most one entry per material fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MaterialRevisions {
    revisions: Vec<MaterialRevision>,
}

impl MaterialRevisions {
    pub fn new() -> Self {
        Self {
            revisions: Vec::new(),
        }
    }

    /// Append a revision, rejecting a second entry for the same material.
    pub fn push(&mut self, revision: MaterialRevision) -> Result<()> {
        let fingerprint = revision.fingerprint();
        if self.find(&fingerprint).is_some() {
            return Err(BuildCauseError::DuplicateMaterial(fingerprint));
        }
        self.revisions.push(revision);
        Ok(())
    }

    pub fn from_revisions(revisions: impl IntoIterator<Item = MaterialRevision>) -> Result<Self> {
        let mut set = Self::new();
        for revision in revisions {
            set.push(revision)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialRevision> {
        self.revisions.iter()
    }

    /// Flag the materials whose latest revision differs from `previous`
    /// and drop the modifications `previous` already covered.
    pub fn mark_changes_since(&mut self, previous: &MaterialRevisions) {
        for revision in &mut self.revisions {
            let before = previous
                .find(&revision.fingerprint())
                .map(|r| r.latest_revision().to_string());
            revision.changed = before.as_deref() != Some(revision.latest_revision());
            revision.retain_newer_than(before.as_deref());
        }
    }

    pub fn find(&self, fingerprint: &str) -> Option<&MaterialRevision> {
        self.revisions.iter().find(|r| r.fingerprint() == fingerprint)
    }

    pub fn total_modifications(&self) -> usize {
        self.revisions.iter().map(|r| r.modifications().len()).sum()
    }

    pub fn latest_modified_time(&self) -> Option<DateTime<Utc>> {
        self.revisions.iter().map(|r| r.latest_modified_time()).max()
    }

    /// Most recent modification across all materials.
    pub fn latest_modification(&self) -> Option<&Modification> {
        self.revisions
            .iter()
            .map(|r| r.latest_modification())
            .max_by_key(|m| m.modified_time)
    }

    pub fn any_changed(&self) -> bool {
        self.revisions.iter().any(|r| r.changed)
    }

    /// Whether both sets hold equivalent revisions for the same materials,
    /// ignoring order.
    pub fn contains_equivalent(&self, other: &MaterialRevisions) -> bool {
        self.len() == other.len()
            && self.revisions.iter().all(|mine| {
                other
                    .find(&mine.fingerprint())
                    .is_some_and(|theirs| mine.is_equivalent(theirs))
            })
    }
}

impl<'a> IntoIterator for &'a MaterialRevisions {
    type Item = &'a MaterialRevision;
    type IntoIter = std::slice::Iter<'a, MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.iter()
    }
}
