// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::material::Material;
use crate::ports::{Authorizer, ConfigProvider};
use crate::producer::ProducerSettings;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [settings]
/// fanin_backtrack_limit = 100
/// poll_timeout_secs = 300
///
/// [pipeline.build]
/// operators = ["alice"]
///
/// [[pipeline.build.material]]
/// type = "scm"
/// kind = "git"
/// url = "https://example.com/repo.git"
///
/// [[pipeline.build.material]]
/// type = "dependency"
/// pipeline = "upstream"
/// stage = "package"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub settings: SettingsSection,

    /// Pipelines keyed by name.
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineConfig>,
}

/// Validated configuration. Obtain one through `ConfigFile::try_from`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: SettingsSection,
    pub pipeline: BTreeMap<String, PipelineConfig>,
}

/// `[settings]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettingsSection {
    /// Revisions walked back per upstream material before a fan-in is
    /// declared unresolvable.
    #[serde(default = "default_backtrack_limit")]
    pub fanin_backtrack_limit: usize,

    /// Seconds to wait for all material polls of one trigger attempt.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub final_modification_check: bool,

    #[serde(default = "default_expansion_depth")]
    pub expansion_depth: usize,
}

fn default_backtrack_limit() -> usize {
    100
}

fn default_poll_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_expansion_depth() -> usize {
    4
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            fanin_backtrack_limit: default_backtrack_limit(),
            poll_timeout_secs: default_poll_timeout_secs(),
            final_modification_check: default_true(),
            expansion_depth: default_expansion_depth(),
        }
    }
}

/// `[pipeline.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Ordered material list (`[[pipeline.<name>.material]]`).
    #[serde(default)]
    pub material: Vec<Material>,

    /// Users allowed to trigger the pipeline. `None` lets everyone.
    #[serde(default)]
    pub operators: Option<Vec<String>>,
}

impl ConfigFile {
    /// Build without validation; callers go through `try_from`.
    pub(crate) fn new_unchecked(
        settings: SettingsSection,
        pipeline: BTreeMap<String, PipelineConfig>,
    ) -> Self {
        Self { settings, pipeline }
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipeline.keys().map(String::as_str)
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            backtrack_limit: self.settings.fanin_backtrack_limit,
            poll_timeout: Duration::from_secs(self.settings.poll_timeout_secs),
            final_modification_check: self.settings.final_modification_check,
            expansion_depth: self.settings.expansion_depth,
        }
    }
}

impl ConfigProvider for ConfigFile {
    fn materials_of(&self, pipeline: &str) -> Option<Vec<Material>> {
        self.pipeline.get(pipeline).map(|p| p.material.clone())
    }

    fn has_pipeline(&self, pipeline: &str) -> bool {
        self.pipeline.contains_key(pipeline)
    }
}

impl Authorizer for ConfigFile {
    fn can_trigger(&self, actor: &str, pipeline: &str) -> bool {
        match self.pipeline.get(pipeline) {
            Some(p) => p
                .operators
                .as_ref()
                .is_none_or(|ops| ops.iter().any(|op| op == actor)),
            None => false,
        }
    }
}
