// src/health.rs

//! Structured status notifications for user-visible reporting.

use std::fmt;

/// Which aspect of a pipeline a health state describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthTopic {
    /// Producing and scheduling build causes.
    Scheduling,
    /// Polling the pipeline's materials.
    MaterialUpdate,
}

/// Stable identity of a health state; a newer state with the same id
/// replaces the older one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealthStateId {
    pub pipeline: String,
    pub topic: HealthTopic,
}

impl HealthStateId {
    pub fn scheduling(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            topic: HealthTopic::Scheduling,
        }
    }

    pub fn material_update(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            topic: HealthTopic::MaterialUpdate,
        }
    }
}

impl fmt::Display for HealthStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.pipeline, self.topic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Success,
    Accepted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    pub id: HealthStateId,
    pub level: HealthLevel,
    pub message: String,
    pub description: String,
}

impl HealthState {
    pub fn success(id: HealthStateId) -> Self {
        Self {
            id,
            level: HealthLevel::Success,
            message: String::new(),
            description: String::new(),
        }
    }

    pub fn accepted(id: HealthStateId, message: impl Into<String>) -> Self {
        Self {
            id,
            level: HealthLevel::Accepted,
            message: message.into(),
            description: String::new(),
        }
    }

    pub fn error(id: HealthStateId, message: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            level: HealthLevel::Error,
            message: message.into(),
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == HealthLevel::Error
    }
}
