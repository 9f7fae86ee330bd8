#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use buildcause::config::{ConfigFile, PipelineConfig, RawConfigFile, SettingsSection};
use buildcause::errors::Result;
use buildcause::material::{Material, Modification, ScmKind, ScmMaterial};

/// Fixed point in time plus `minutes`, so histories order predictably.
pub fn ts(minutes: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_767_225_600, 0).expect("valid base timestamp")
        + Duration::minutes(minutes)
}

pub fn git(url: &str) -> Material {
    Material::scm(ScmKind::Git, url)
}

pub fn git_named(name: &str, url: &str) -> Material {
    git(url).with_name(name)
}

/// Subversion material that asks for its externals to be expanded.
pub fn svn_with_externals(name: &str, url: &str) -> Material {
    let mut scm = ScmMaterial::new(ScmKind::Svn, url);
    scm.name = Some(name.to_string());
    scm.check_externals = true;
    Material::Scm(scm)
}

pub fn dep(pipeline: &str, stage: &str) -> Material {
    Material::dependency(pipeline, stage)
}

pub fn modification(revision: &str, minutes: i64) -> Modification {
    Modification::new(revision, ts(minutes)).with_author("dev")
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                settings: SettingsSection::default(),
                pipeline: BTreeMap::new(),
            },
        }
    }

    pub fn pipeline(mut self, name: &str, materials: Vec<Material>) -> Self {
        self.config.pipeline.insert(
            name.to_string(),
            PipelineConfig {
                material: materials,
                operators: None,
            },
        );
        self
    }

    pub fn operators(mut self, name: &str, operators: &[&str]) -> Self {
        if let Some(p) = self.config.pipeline.get_mut(name) {
            p.operators = Some(operators.iter().map(|s| s.to_string()).collect());
        }
        self
    }

    pub fn backtrack_limit(mut self, limit: usize) -> Self {
        self.config.settings.fanin_backtrack_limit = limit;
        self
    }

    pub fn final_modification_check(mut self, enabled: bool) -> Self {
        self.config.settings.final_modification_check = enabled;
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
