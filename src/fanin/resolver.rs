// src/fanin/resolver.rs

//! Fan-in resolution.
//!
//! Each direct dependency that reaches a shared material becomes a
//! participant with a cursor into its recorded history (newest first, at most
//! `backtrack_limit` entries). For the revision under each cursor we collect
//! the revisions of shared materials that run was built from, following
//! upstream runs recursively. While participants disagree on a shared
//! material, every participant ahead of the oldest value steps back one
//! revision. The first agreement reached is the most recent consistent set;
//! running out of history is an error.
//!
//! The walk only reads recorded data and iterates in fingerprint order, so
//! the same histories always yield the same result.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::errors::{BuildCauseError, Result};
use crate::fanin::graph::{FanInGraph, UpstreamNode};
use crate::material::{
    DependencyRevision, Fingerprint, Material, MaterialRevision, MaterialRevisions, Modification,
    RevisionKey,
};
use crate::ports::{ConfigProvider, RevisionStore};

/// Revisions of shared materials implied by one participant's revision.
type Constraints = BTreeMap<Fingerprint, RevisionKey>;

pub struct FanInResolver<'a> {
    config: &'a dyn ConfigProvider,
    store: &'a dyn RevisionStore,
    backtrack_limit: usize,
}

struct Participant<'g> {
    node: &'g UpstreamNode,
    candidates: Vec<Modification>,
    cursor: usize,
    current: Constraints,
    pinned: bool,
}

impl<'a> FanInResolver<'a> {
    pub fn new(
        config: &'a dyn ConfigProvider,
        store: &'a dyn RevisionStore,
        backtrack_limit: usize,
    ) -> Self {
        Self {
            config,
            store,
            backtrack_limit: backtrack_limit.max(1),
        }
    }

    /// Compute one consistent revision set for `pipeline`.
    ///
    /// - `materials`: the pipeline's expanded materials, in order.
    /// - `histories`: recorded modifications per material, newest first.
    /// - `pinned`: caller-chosen revisions that override the newest one.
    pub fn resolve(
        &self,
        pipeline: &str,
        materials: &[Material],
        histories: &BTreeMap<Fingerprint, Vec<Modification>>,
        pinned: &BTreeMap<Fingerprint, Modification>,
    ) -> Result<MaterialRevisions> {
        let graph = FanInGraph::build(self.config, pipeline, materials);

        let (participants, agreed) = if graph.has_fan_in() {
            self.walk(&graph, histories, pinned)?
        } else {
            (Vec::new(), Constraints::new())
        };

        let cursors: BTreeMap<&str, usize> = participants
            .iter()
            .map(|p| (p.node.fingerprint.as_str(), p.cursor))
            .collect();

        let mut resolved = MaterialRevisions::new();
        for material in materials {
            let fingerprint = material.fingerprint();
            let history = histories.get(&fingerprint).map(Vec::as_slice).unwrap_or(&[]);

            let revision = if let Some(pin) = pinned.get(&fingerprint) {
                MaterialRevision::new(material.clone(), pin.clone())
            } else if let Some(&cursor) = cursors.get(fingerprint.as_str()) {
                self.revision_from(pipeline, material, &history[cursor..])?
            } else if let Some(key) = agreed.get(&fingerprint) {
                self.agreed_revision(pipeline, material, history, key)?
            } else {
                self.revision_from(pipeline, material, history)?
            };

            resolved.push(revision)?;
        }

        debug!(
            pipeline = %pipeline,
            materials = resolved.len(),
            "resolved revision set"
        );
        Ok(resolved)
    }

    fn walk<'g>(
        &self,
        graph: &'g FanInGraph,
        histories: &BTreeMap<Fingerprint, Vec<Modification>>,
        pinned: &BTreeMap<Fingerprint, Modification>,
    ) -> Result<(Vec<Participant<'g>>, Constraints)> {
        let mut participants = Vec::new();
        for node in &graph.upstream {
            if !node.closure.iter().any(|fp| graph.is_shared(fp)) {
                continue;
            }
            let (candidates, is_pinned) = match pinned.get(&node.fingerprint) {
                Some(pin) => (vec![pin.clone()], true),
                None => (
                    histories
                        .get(&node.fingerprint)
                        .map(|h| h.iter().take(self.backtrack_limit).cloned().collect())
                        .unwrap_or_default(),
                    false,
                ),
            };
            let mut participant = Participant {
                node,
                candidates,
                cursor: 0,
                current: Constraints::new(),
                pinned: is_pinned,
            };
            self.settle(graph, &mut participant, None)?;
            participants.push(participant);
        }

        loop {
            let Some((fingerprint, oldest, ahead)) = find_disagreement(graph, &participants) else {
                break;
            };

            debug!(
                pipeline = %graph.pipeline,
                material = %graph.name_of(&fingerprint),
                target = %oldest.revision_label(),
                behind = ahead.len(),
                "fan-in disagreement; walking back"
            );

            for index in ahead {
                let participant = &mut participants[index];
                participant.cursor += 1;
                self.settle(graph, participant, Some((&fingerprint, &oldest)))?;
            }
        }

        let mut agreed = Constraints::new();
        for participant in &participants {
            for (fp, key) in &participant.current {
                agreed.entry(fp.clone()).or_insert_with(|| key.clone());
            }
        }

        if participants.iter().any(|p| p.cursor > 0) {
            info!(
                pipeline = %graph.pipeline,
                "fan-in selected older upstream revisions for consistency"
            );
        }

        Ok((participants, agreed))
    }

    /// Move `participant` forward (older) until its cursor sits on a revision
    /// with consistent constraints.
    fn settle(
        &self,
        graph: &FanInGraph,
        participant: &mut Participant<'_>,
        chasing: Option<(&Fingerprint, &RevisionKey)>,
    ) -> Result<()> {
        while let Some(candidate) = participant.candidates.get(participant.cursor) {
            if let Some(constraints) = self.constraints_for(graph, participant.node, candidate)? {
                participant.current = constraints;
                return Ok(());
            }
            participant.cursor += 1;
        }

        let material = participant.node.material.display_name();
        let detail = match chasing {
            Some((fp, key)) if participant.pinned => format!(
                "pinned revision does not agree on {} (needs {} or older)",
                graph.name_of(fp),
                key.revision_label()
            ),
            Some((fp, key)) => format!(
                "no revision within the last {} agrees on {} (needs {} or older)",
                participant.candidates.len(),
                graph.name_of(fp),
                key.revision_label()
            ),
            None if participant.candidates.is_empty() => "no recorded revisions".to_string(),
            None => format!(
                "none of the last {} revisions has consistent upstream data",
                participant.candidates.len()
            ),
        };
        warn!(pipeline = %graph.pipeline, material = %material, detail = %detail, "fan-in unresolvable");
        Err(BuildCauseError::FanInUnresolvable {
            pipeline: graph.pipeline.clone(),
            material,
            detail,
        })
    }

    /// Shared-material revisions implied by `modification` of `node`, or
    /// `None` when the run it points at is internally inconsistent.
    fn constraints_for(
        &self,
        graph: &FanInGraph,
        node: &UpstreamNode,
        modification: &Modification,
    ) -> Result<Option<Constraints>> {
        let mut constraints = Constraints::new();
        if graph.is_shared(&node.fingerprint) {
            constraints.insert(
                node.fingerprint.clone(),
                RevisionKey::of(&node.material, modification),
            );
        }

        let run = match modification.revision.parse::<DependencyRevision>() {
            Ok(run) => run,
            Err(err) => {
                warn!(
                    material = %node.material.display_name(),
                    error = %err,
                    "skipping dependency revision that cannot be parsed"
                );
                return Ok(None);
            }
        };

        let mut visited = HashSet::new();
        if self.collect_run(graph, &run.pipeline, run.pipeline_counter, &mut constraints, &mut visited)? {
            Ok(Some(constraints))
        } else {
            Ok(None)
        }
    }

    /// Add the shared-material revisions of `pipeline` run `counter` (and of
    /// the upstream runs it was built from). Returns `false` on a conflict.
    fn collect_run(
        &self,
        graph: &FanInGraph,
        pipeline: &str,
        counter: u64,
        constraints: &mut Constraints,
        visited: &mut HashSet<(String, u64)>,
    ) -> Result<bool> {
        if !visited.insert((pipeline.to_string(), counter)) {
            return Ok(true);
        }

        let Some(revisions) = self.store.run_revisions(pipeline, counter)? else {
            debug!(pipeline = %pipeline, counter, "no recorded revisions for upstream run");
            return Ok(true);
        };

        for revision in &revisions {
            let fingerprint = revision.fingerprint();
            if graph.is_shared(&fingerprint) {
                let key = revision.latest_key();
                match constraints.get(&fingerprint) {
                    Some(existing) if *existing != key => {
                        debug!(
                            pipeline = %pipeline,
                            counter,
                            material = %graph.name_of(&fingerprint),
                            "upstream run disagrees with sibling path"
                        );
                        return Ok(false);
                    }
                    Some(_) => {}
                    None => {
                        constraints.insert(fingerprint, key);
                    }
                }
            }

            if revision.material.is_dependency() {
                if let Ok(upstream) = revision.latest_revision().parse::<DependencyRevision>() {
                    if !self.collect_run(
                        graph,
                        &upstream.pipeline,
                        upstream.pipeline_counter,
                        constraints,
                        visited,
                    )? {
                        return Ok(false);
                    }
                }
            }
        }

        Ok(true)
    }

    fn revision_from(
        &self,
        pipeline: &str,
        material: &Material,
        history: &[Modification],
    ) -> Result<MaterialRevision> {
        MaterialRevision::with_modifications(material.clone(), history.to_vec()).ok_or_else(|| {
            BuildCauseError::FanInUnresolvable {
                pipeline: pipeline.to_string(),
                material: material.display_name(),
                detail: "no recorded revisions".to_string(),
            }
        })
    }

    /// Revision of a pipeline's own material fixed by what its upstream
    /// pipelines were built from.
    fn agreed_revision(
        &self,
        pipeline: &str,
        material: &Material,
        history: &[Modification],
        key: &RevisionKey,
    ) -> Result<MaterialRevision> {
        if let Some(pos) = history
            .iter()
            .position(|m| RevisionKey::of(material, m) == *key)
        {
            return self.revision_from(pipeline, material, &history[pos..]);
        }

        let label = key.revision_label();
        match self.store.find_modification(&material.fingerprint(), &label)? {
            Some(modification) => Ok(MaterialRevision::new(material.clone(), modification)),
            None => Err(BuildCauseError::FanInUnresolvable {
                pipeline: pipeline.to_string(),
                material: material.display_name(),
                detail: format!("revision {label} used upstream is not known for this material"),
            }),
        }
    }
}

/// First shared material (in fingerprint order) on which participants
/// disagree, the oldest value seen for it, and the participants ahead of it.
fn find_disagreement(
    graph: &FanInGraph,
    participants: &[Participant<'_>],
) -> Option<(Fingerprint, RevisionKey, Vec<usize>)> {
    graph.shared.iter().find_map(|fingerprint| {
        let values: Vec<(usize, &RevisionKey)> = participants
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.current.get(fingerprint).map(|key| (i, key)))
            .collect();
        let oldest = values.iter().map(|(_, key)| *key).min()?;
        let ahead: Vec<usize> = values
            .iter()
            .filter(|(_, key)| *key > oldest)
            .map(|(i, _)| *i)
            .collect();
        if ahead.is_empty() {
            None
        } else {
            Some((fingerprint.clone(), oldest.clone(), ahead))
        }
    })
}
