// src/fanin/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::material::{Fingerprint, Material};
use crate::ports::ConfigProvider;

/// A direct dependency material of the pipeline being resolved, with every
/// material reachable through it.
#[derive(Debug, Clone)]
pub struct UpstreamNode {
    pub material: Material,
    pub fingerprint: Fingerprint,
    /// The node's own fingerprint plus every material of every pipeline
    /// upstream of it.
    pub closure: BTreeSet<Fingerprint>,
}

/// Fan-in view of one pipeline's dependency graph.
///
/// A material is *shared* when more than one path from the pipeline reaches
/// it: it sits in the closure of two or more direct dependencies, or it is
/// one of the pipeline's own non-dependency materials and also sits in some
/// dependency's closure. All paths must agree on the revision of every
/// shared material.
#[derive(Debug, Clone)]
pub struct FanInGraph {
    pub pipeline: String,
    pub upstream: Vec<UpstreamNode>,
    pub shared: BTreeSet<Fingerprint>,
    names: BTreeMap<Fingerprint, String>,
}

impl FanInGraph {
    pub fn build(config: &dyn ConfigProvider, pipeline: &str, materials: &[Material]) -> Self {
        let mut names: BTreeMap<Fingerprint, String> = BTreeMap::new();
        let mut upstream = Vec::new();

        for material in materials {
            let fingerprint = material.fingerprint();
            names.insert(fingerprint.clone(), material.display_name());
            if let Some(dep) = material.as_dependency() {
                let mut closure = BTreeSet::from([fingerprint.clone()]);
                collect_upstream(config, &dep.pipeline, &mut closure, &mut names);
                upstream.push(UpstreamNode {
                    material: material.clone(),
                    fingerprint,
                    closure,
                });
            }
        }

        let mut reach: BTreeMap<&Fingerprint, usize> = BTreeMap::new();
        for node in &upstream {
            for fp in &node.closure {
                *reach.entry(fp).or_default() += 1;
            }
        }

        let mut shared: BTreeSet<Fingerprint> = reach
            .iter()
            .filter(|(_, count)| **count >= 2)
            .map(|(fp, _)| (*fp).clone())
            .collect();

        for material in materials.iter().filter(|m| !m.is_dependency()) {
            let fingerprint = material.fingerprint();
            if reach.contains_key(&fingerprint) {
                shared.insert(fingerprint);
            }
        }

        if !shared.is_empty() {
            debug!(
                pipeline = %pipeline,
                shared = shared.len(),
                "pipeline has fan-in materials"
            );
        }

        Self {
            pipeline: pipeline.to_string(),
            upstream,
            shared,
            names,
        }
    }

    pub fn has_fan_in(&self) -> bool {
        !self.shared.is_empty()
    }

    pub fn is_shared(&self, fingerprint: &str) -> bool {
        self.shared.contains(fingerprint)
    }

    pub fn name_of(&self, fingerprint: &str) -> String {
        self.names
            .get(fingerprint)
            .cloned()
            .unwrap_or_else(|| fingerprint.to_string())
    }
}

fn collect_upstream(
    config: &dyn ConfigProvider,
    root: &str,
    closure: &mut BTreeSet<Fingerprint>,
    names: &mut BTreeMap<Fingerprint, String>,
) {
    let mut stack: Vec<String> = vec![root.to_string()];
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(pipeline) = stack.pop() {
        if !visited.insert(pipeline.clone()) {
            continue;
        }

        let Some(materials) = config.materials_of(&pipeline) else {
            // Validated configuration never gets here.
            warn!(pipeline = %pipeline, "upstream pipeline missing from configuration");
            continue;
        };

        for material in materials {
            let fingerprint = material.fingerprint();
            names
                .entry(fingerprint.clone())
                .or_insert_with(|| material.display_name());
            closure.insert(fingerprint);
            if let Some(dep) = material.as_dependency() {
                stack.push(dep.pipeline.clone());
            }
        }
    }
}
