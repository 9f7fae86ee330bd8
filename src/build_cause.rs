// src/build_cause.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::material::MaterialRevisions;

/// Approver recorded on automatically triggered build causes.
pub const AUTOMATIC_APPROVER: &str = "changes";

/// How a pipeline run came to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A material changed and the timer picked it up.
    Automatic,
    /// A user forced the run with the latest revisions.
    Manual,
    /// A user forced the run with one or more pinned revisions.
    Pinned,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::Automatic => "automatic",
            TriggerKind::Manual => "manual",
            TriggerKind::Pinned => "pinned",
        };
        f.write_str(s)
    }
}

/// The consistent revision set plus trigger metadata that justifies one
/// pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCause {
    pub revisions: MaterialRevisions,
    pub approver: String,
    pub kind: TriggerKind,
    pub message: String,
    /// When the material data this cause was resolved from was known to be
    /// current.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materials_updated_at: Option<DateTime<Utc>>,
}

impl BuildCause {
    pub fn automatic(revisions: MaterialRevisions) -> Self {
        let message = match revisions.latest_modification() {
            Some(m) => match &m.author {
                Some(author) => format!("modified by {author}"),
                None => "modified".to_string(),
            },
            None => "modified".to_string(),
        };
        Self {
            revisions,
            approver: AUTOMATIC_APPROVER.to_string(),
            kind: TriggerKind::Automatic,
            message,
            materials_updated_at: None,
        }
    }

    pub fn manual(revisions: MaterialRevisions, actor: &str, pinned: bool) -> Self {
        let (kind, message) = if pinned {
            (
                TriggerKind::Pinned,
                format!("Forced by {actor} with pinned revisions"),
            )
        } else {
            (TriggerKind::Manual, format!("Forced by {actor}"))
        };
        Self {
            revisions,
            approver: actor.to_string(),
            kind,
            message,
            materials_updated_at: None,
        }
    }

    /// Sentinel for pipelines that have never run.
    pub fn never_run() -> Self {
        Self {
            revisions: MaterialRevisions::new(),
            approver: String::new(),
            kind: TriggerKind::Automatic,
            message: "never run".to_string(),
            materials_updated_at: None,
        }
    }

    pub fn is_never_run(&self) -> bool {
        self.revisions.is_empty() && self.approver.is_empty()
    }

    pub fn with_materials_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.materials_updated_at = Some(at);
        self
    }
}
