// src/poll.rs

//! Material pollers.
//!
//! - [`PollerRegistry`] routes a material to the poller registered for its
//!   kind (source control, dependency, package, plugin).
//! - [`DependencyPoller`] answers dependency materials from the recorded
//!   upstream history; upstream stage completions are recorded into the
//!   revision store by whoever runs the stages.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::material::{Material, Modification, RevisionKey};
use crate::ports::{BoxFuture, MaterialPoller, RevisionStore};

/// How many upstream runs a dependency poll looks at.
const DEPENDENCY_POLL_WINDOW: usize = 100;

/// Poller that dispatches on the material kind.
#[derive(Clone)]
pub struct PollerRegistry {
    scm: Option<Arc<dyn MaterialPoller>>,
    dependency: Option<Arc<dyn MaterialPoller>>,
    package: Option<Arc<dyn MaterialPoller>>,
    plugin: Option<Arc<dyn MaterialPoller>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self {
            scm: None,
            dependency: None,
            package: None,
            plugin: None,
        }
    }

    pub fn with_scm(mut self, poller: Arc<dyn MaterialPoller>) -> Self {
        self.scm = Some(poller);
        self
    }

    pub fn with_dependency(mut self, poller: Arc<dyn MaterialPoller>) -> Self {
        self.dependency = Some(poller);
        self
    }

    pub fn with_package(mut self, poller: Arc<dyn MaterialPoller>) -> Self {
        self.package = Some(poller);
        self
    }

    pub fn with_plugin(mut self, poller: Arc<dyn MaterialPoller>) -> Self {
        self.plugin = Some(poller);
        self
    }

    fn poller_for(&self, material: &Material) -> Option<&Arc<dyn MaterialPoller>> {
        match material {
            Material::Scm(_) => self.scm.as_ref(),
            Material::Dependency(_) => self.dependency.as_ref(),
            Material::Package(_) => self.package.as_ref(),
            Material::Plugin(_) => self.plugin.as_ref(),
        }
    }
}

impl Default for PollerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialPoller for PollerRegistry {
    fn modifications_since<'a>(
        &'a self,
        material: &'a Material,
        since: Option<&'a Modification>,
    ) -> BoxFuture<'a, Result<Vec<Modification>>> {
        match self.poller_for(material) {
            Some(poller) => poller.modifications_since(material, since),
            None => {
                let kind = material.kind_name();
                Box::pin(async move { Err(anyhow!("no poller configured for {kind} materials")) })
            }
        }
    }
}

/// Reads dependency-material modifications (upstream stage runs) from the
/// revision store.
pub struct DependencyPoller {
    store: Arc<dyn RevisionStore>,
}

impl DependencyPoller {
    pub fn new(store: Arc<dyn RevisionStore>) -> Self {
        Self { store }
    }
}

impl MaterialPoller for DependencyPoller {
    fn modifications_since<'a>(
        &'a self,
        material: &'a Material,
        since: Option<&'a Modification>,
    ) -> BoxFuture<'a, Result<Vec<Modification>>> {
        Box::pin(async move {
            if !material.is_dependency() {
                return Err(anyhow!(
                    "dependency poller cannot poll {} material {}",
                    material.kind_name(),
                    material.display_name()
                ));
            }

            let history = self
                .store
                .history(&material.fingerprint(), DEPENDENCY_POLL_WINDOW)?;

            let newer = match since {
                None => history.into_iter().take(1).collect(),
                Some(since) => {
                    let floor = RevisionKey::of(material, since);
                    history
                        .into_iter()
                        .filter(|m| RevisionKey::of(material, m) > floor)
                        .collect()
                }
            };
            Ok(newer)
        })
    }
}
