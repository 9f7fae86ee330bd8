// src/material/expansion.rs

//! Material expansion.
//!
//! A source-control checkout may reference sub-locations (externals) that
//! have to be polled as materials of their own. Expansion turns a declared
//! material into the ordered list of concrete materials: the material itself
//! first, then its externals depth-first. Dependency, package and plugin
//! materials expand to themselves.
//!
//! Asking the source system for externals is potentially network IO, so
//! results are cached per declared fingerprint. The cache is read-mostly:
//! lookups take a read lock, and a miss computes outside the lock before
//! taking the write lock to insert. Invalidation is driven from outside when
//! material configuration changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result as AnyResult;
use tracing::{debug, warn};

use crate::errors::{BuildCauseError, Result};
use crate::material::{Fingerprint, Material, ScmMaterial};

/// Queries a source system for the sub-locations a checkout references.
pub trait ExternalsSource: Send + Sync {
    /// Externals directly referenced by `material`. Their `folder` is
    /// relative to the parent checkout.
    fn externals_of(&self, material: &ScmMaterial) -> AnyResult<Vec<ScmMaterial>>;
}

/// Source with no externals anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternals;

impl ExternalsSource for NoExternals {
    fn externals_of(&self, _material: &ScmMaterial) -> AnyResult<Vec<ScmMaterial>> {
        Ok(Vec::new())
    }
}

pub struct MaterialExpander {
    source: Arc<dyn ExternalsSource>,
    max_depth: usize,
    cache: RwLock<HashMap<Fingerprint, Arc<Vec<Material>>>>,
}

impl MaterialExpander {
    pub fn new(source: Arc<dyn ExternalsSource>, max_depth: usize) -> Self {
        Self {
            source,
            max_depth,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Concrete materials implied by `material`, cached by fingerprint.
    pub fn expand(&self, material: &Material) -> Result<Arc<Vec<Material>>> {
        let fingerprint = material.fingerprint();

        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fingerprint)
        {
            return Ok(Arc::clone(hit));
        }

        debug!(material = %material.display_name(), "expansion cache miss");
        let expanded = Arc::new(self.expand_uncached(material)?);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entry(fingerprint).or_insert(expanded);
        Ok(Arc::clone(entry))
    }

    /// Expand every declared material of a pipeline, dropping materials that
    /// several declarations expand to after their first occurrence.
    pub fn expand_all(&self, materials: &[Material]) -> Result<Vec<Material>> {
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        let mut out = Vec::new();
        for material in materials {
            for concrete in self.expand(material)?.iter() {
                if seen.insert(concrete.fingerprint()) {
                    out.push(concrete.clone());
                } else {
                    debug!(
                        material = %concrete.display_name(),
                        "material reached through more than one declaration; keeping first"
                    );
                }
            }
        }
        Ok(out)
    }

    pub fn invalidate(&self, fingerprint: &str) {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint)
            .is_some();
        if removed {
            debug!(fingerprint = %fingerprint, "invalidated expansion cache entry");
        }
    }

    pub fn invalidate_all(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn expand_uncached(&self, material: &Material) -> Result<Vec<Material>> {
        let scm = match material {
            Material::Scm(scm) if scm.check_externals => scm,
            _ => return Ok(vec![material.clone()]),
        };

        let mut out = vec![material.clone()];
        let mut seen: HashSet<Fingerprint> = HashSet::from([material.fingerprint()]);
        self.collect_externals(scm, 1, &mut seen, &mut out)
            .map_err(|source| BuildCauseError::Expansion {
                material: material.display_name(),
                source,
            })?;
        Ok(out)
    }

    fn collect_externals(
        &self,
        parent: &ScmMaterial,
        depth: usize,
        seen: &mut HashSet<Fingerprint>,
        out: &mut Vec<Material>,
    ) -> AnyResult<()> {
        if depth > self.max_depth {
            warn!(
                url = %parent.url,
                max_depth = self.max_depth,
                "externals nested deeper than the expansion limit; not descending"
            );
            return Ok(());
        }

        for mut external in self.source.externals_of(parent)? {
            external.folder = join_folder(parent.folder.as_deref(), external.folder.as_deref());
            let recurse = external.check_externals;
            let material = Material::Scm(external.clone());
            if !seen.insert(material.fingerprint()) {
                continue;
            }
            out.push(material);
            if recurse {
                self.collect_externals(&external, depth + 1, seen, out)?;
            }
        }
        Ok(())
    }
}

fn join_folder(parent: Option<&str>, child: Option<&str>) -> Option<String> {
    let parent = parent.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty());
    let child = child.map(|c| c.trim_start_matches('/')).filter(|c| !c.is_empty());
    match (parent, child) {
        (Some(p), Some(c)) => Some(format!("{p}/{c}")),
        (Some(p), None) => Some(p.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (None, None) => None,
    }
}
