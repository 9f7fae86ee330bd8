// src/material/modification.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a file in a modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Added,
    Modified,
    Deleted,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    #[serde(default)]
    pub action: FileAction,
}

/// One observed change on a material.
///
/// Created by a poll and never mutated afterwards. Lists of modifications
/// are kept newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Opaque revision identifier (commit id, changelist number,
    /// `pipeline/counter/stage/counter` for dependencies).
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub modified_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ModifiedFile>,
    /// Plugin- or dependency-specific metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_data: BTreeMap<String, String>,
}

impl Modification {
    pub fn new(revision: impl Into<String>, modified_time: DateTime<Utc>) -> Self {
        Self {
            revision: revision.into(),
            author: None,
            comment: None,
            modified_time,
            files: Vec::new(),
            additional_data: BTreeMap::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, action: FileAction) -> Self {
        self.files.push(ModifiedFile {
            path: path.into(),
            action,
        });
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }
}
