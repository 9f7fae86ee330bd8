// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BuildCauseError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BuildCauseError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.settings, raw.pipeline))
    }
}

/// Run every check on an already validated file again. Used after
/// programmatic edits.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_raw_config(&RawConfigFile {
        settings: cfg.settings.clone(),
        pipeline: cfg.pipeline.clone(),
    })
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_pipelines(cfg)?;
    validate_settings(cfg)?;
    validate_materials(cfg)?;
    validate_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_pipelines(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.is_empty() {
        return Err(BuildCauseError::ConfigError(
            "config must contain at least one [pipeline.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(cfg: &RawConfigFile) -> Result<()> {
    let s = &cfg.settings;
    if s.fanin_backtrack_limit == 0 {
        return Err(BuildCauseError::ConfigError(
            "[settings].fanin_backtrack_limit must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.poll_timeout_secs == 0 {
        return Err(BuildCauseError::ConfigError(
            "[settings].poll_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if s.expansion_depth == 0 {
        return Err(BuildCauseError::ConfigError(
            "[settings].expansion_depth must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_materials(cfg: &RawConfigFile) -> Result<()> {
    for (name, pipeline) in &cfg.pipeline {
        if pipeline.material.is_empty() {
            return Err(BuildCauseError::ConfigError(format!(
                "pipeline '{name}' must declare at least one material"
            )));
        }

        let mut seen = HashSet::new();
        for material in &pipeline.material {
            if !seen.insert(material.fingerprint()) {
                return Err(BuildCauseError::ConfigError(format!(
                    "pipeline '{name}' declares material '{}' more than once",
                    material.display_name()
                )));
            }
        }
    }
    Ok(())
}

fn validate_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, pipeline) in &cfg.pipeline {
        for dep in pipeline.material.iter().filter_map(|m| m.as_dependency()) {
            if dep.pipeline == *name {
                return Err(BuildCauseError::ConfigError(format!(
                    "pipeline '{name}' cannot depend on itself"
                )));
            }
            if !cfg.pipeline.contains_key(&dep.pipeline) {
                return Err(BuildCauseError::ConfigError(format!(
                    "pipeline '{name}' depends on unknown pipeline '{}'",
                    dep.pipeline
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: upstream -> downstream.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.pipeline.keys() {
        graph.add_node(name.as_str());
    }

    for (name, pipeline) in &cfg.pipeline {
        for dep in pipeline.material.iter().filter_map(|m| m.as_dependency()) {
            graph.add_edge(dep.pipeline.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(BuildCauseError::DagCycle(format!(
            "cycle detected in pipeline dependencies involving pipeline '{}'",
            cycle.node_id()
        ))),
    }
}
