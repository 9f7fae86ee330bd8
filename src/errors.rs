// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

use crate::material::Fingerprint;

/// One material that failed to report fresh modifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    pub fingerprint: Fingerprint,
    pub material: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum BuildCauseError {
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Pipeline '{0}' is already triggered")]
    AlreadyTriggered(String),

    #[error("User '{actor}' does not have permission to trigger pipeline '{pipeline}'")]
    PermissionDenied { actor: String, pipeline: String },

    #[error("Material update failed for pipeline '{pipeline}': {}", describe_failures(.failures))]
    PollFailed {
        pipeline: String,
        failures: Vec<PollFailure>,
    },

    #[error("Cannot resolve a consistent revision set for pipeline '{pipeline}' at material '{material}': {detail}")]
    FanInUnresolvable {
        pipeline: String,
        material: String,
        detail: String,
    },

    #[error("Invalid specified revision '{revision}' for material '{material}' of pipeline '{pipeline}'")]
    InvalidSpecifiedRevision {
        pipeline: String,
        material: String,
        revision: String,
    },

    #[error("Expanding material '{material}' failed: {source}")]
    Expansion {
        material: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Secret resolution failed: {0}")]
    Secret(String),

    #[error("Material with fingerprint {0} appears more than once in a revision set")]
    DuplicateMaterial(String),

    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("A material update listener is already registered for pipeline '{0}'")]
    ListenerAlreadyRegistered(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in pipeline graph: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildCauseError {
    /// Rejections are reported synchronously and leave no state behind.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BuildCauseError::PipelineNotFound(_)
                | BuildCauseError::AlreadyTriggered(_)
                | BuildCauseError::PermissionDenied { .. }
        )
    }

    /// Short message and longer description suitable for the health-state
    /// sink.
    ///
    /// Internal failures are collapsed into a generic message; their detail
    /// only goes to the log.
    pub fn health_message(&self, pipeline: &str) -> (String, String) {
        match self {
            BuildCauseError::PollFailed { failures, .. } => (
                format!("Material update failed for pipeline '{pipeline}'"),
                describe_failures(failures),
            ),
            BuildCauseError::FanInUnresolvable { .. }
            | BuildCauseError::InvalidSpecifiedRevision { .. }
            | BuildCauseError::PermissionDenied { .. }
            | BuildCauseError::AlreadyTriggered(_)
            | BuildCauseError::PipelineNotFound(_)
            | BuildCauseError::Expansion { .. }
            | BuildCauseError::Secret(_) => (
                format!("Failed to trigger pipeline '{pipeline}'"),
                self.to_string(),
            ),
            _ => (
                format!("Error while scheduling pipeline '{pipeline}'"),
                "An unexpected error occurred; check the server logs for details.".to_string(),
            ),
        }
    }
}

fn describe_failures(failures: &[PollFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.material, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildCauseError>;
