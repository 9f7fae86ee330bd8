// src/material/mod.rs

//! Materials: the declared sources of change a pipeline is built from.
//!
//! - [`Material`] is a closed tagged union over source-control, dependency,
//!   package and plugin materials.
//! - [`modification`] holds single observed changes.
//! - [`revision`] pairs materials with their modifications and defines the
//!   consistent revision set used by fan-in.
//! - [`expansion`] turns one declared material into the materials that must
//!   actually be polled.

pub mod expansion;
pub mod modification;
pub mod revision;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::{compute_digest, DigestAlgorithm};
use crate::secrets;

pub use expansion::{ExternalsSource, MaterialExpander, NoExternals};
pub use modification::{FileAction, ModifiedFile, Modification};
pub use revision::{DependencyRevision, MaterialRevision, MaterialRevisions, RevisionKey};

/// Stable identity hash of a material.
pub type Fingerprint = String;

/// Source-control system behind an [`ScmMaterial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmKind {
    Git,
    Svn,
    Hg,
    P4,
    Tfs,
}

impl ScmKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScmKind::Git => "git",
            ScmKind::Svn => "svn",
            ScmKind::Hg => "hg",
            ScmKind::P4 => "p4",
            ScmKind::Tfs => "tfs",
        }
    }
}

/// A version-control location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmMaterial {
    pub kind: ScmKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Destination sub-folder inside the pipeline's working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether sub-locations referenced by this checkout are polled as
    /// materials of their own.
    #[serde(default)]
    pub check_externals: bool,
}

impl ScmMaterial {
    pub fn new(kind: ScmKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            branch: None,
            username: None,
            password: None,
            folder: None,
            name: None,
            check_externals: false,
        }
    }
}

/// An upstream pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMaterial {
    pub pipeline: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMaterial {
    pub repository_id: String,
    pub package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A material backed by an external plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMaterial {
    pub plugin_id: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Declared source of change.
///
/// Materials are immutable configuration: a change to any field produces a
/// new value (and, for identity fields, a new fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Material {
    Scm(ScmMaterial),
    Dependency(DependencyMaterial),
    Package(PackageMaterial),
    Plugin(PluginMaterial),
}

impl Material {
    pub fn scm(kind: ScmKind, url: impl Into<String>) -> Self {
        Material::Scm(ScmMaterial::new(kind, url))
    }

    pub fn dependency(pipeline: impl Into<String>, stage: impl Into<String>) -> Self {
        Material::Dependency(DependencyMaterial {
            pipeline: pipeline.into(),
            stage: stage.into(),
            name: None,
        })
    }

    pub fn package(repository_id: impl Into<String>, package_id: impl Into<String>) -> Self {
        Material::Package(PackageMaterial {
            repository_id: repository_id.into(),
            package_id: package_id.into(),
            name: None,
        })
    }

    pub fn plugin(plugin_id: impl Into<String>, configuration: BTreeMap<String, String>) -> Self {
        Material::Plugin(PluginMaterial {
            plugin_id: plugin_id.into(),
            configuration,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match &mut self {
            Material::Scm(m) => m.name = name,
            Material::Dependency(m) => m.name = name,
            Material::Package(m) => m.name = name,
            Material::Plugin(m) => m.name = name,
        }
        self
    }

    /// Identity hash over the material's identity fields.
    ///
    /// Destination folder, display name and credentials other than the
    /// username do not participate.
    pub fn fingerprint(&self) -> Fingerprint {
        compute_digest(DigestAlgorithm::Sha256, |d| match self {
            Material::Scm(m) => {
                d.field("type", m.kind.as_str()).field("url", &m.url);
                if let Some(branch) = &m.branch {
                    d.field("branch", branch);
                }
                if let Some(username) = &m.username {
                    d.field("username", username);
                }
            }
            Material::Dependency(m) => {
                d.field("type", "dependency")
                    .field("pipeline", &m.pipeline)
                    .field("stage", &m.stage);
            }
            Material::Package(m) => {
                d.field("type", "package")
                    .field("repository", &m.repository_id)
                    .field("package", &m.package_id);
            }
            Material::Plugin(m) => {
                d.field("type", "plugin").field("plugin", &m.plugin_id);
                for (key, value) in &m.configuration {
                    d.field(key, value);
                }
            }
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Material::Scm(m) => m.kind.as_str(),
            Material::Dependency(_) => "dependency",
            Material::Package(_) => "package",
            Material::Plugin(_) => "plugin",
        }
    }

    /// Configured name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Material::Scm(m) => m.name.as_deref(),
            Material::Dependency(m) => m.name.as_deref(),
            Material::Package(m) => m.name.as_deref(),
            Material::Plugin(m) => m.name.as_deref(),
        }
    }

    /// Human-readable label: the configured name, or a description of the
    /// location.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name() {
            return name.to_string();
        }
        match self {
            Material::Scm(m) => match &m.branch {
                Some(branch) => format!("{} [{}]", m.url, branch),
                None => m.url.clone(),
            },
            Material::Dependency(m) => format!("{}/{}", m.pipeline, m.stage),
            Material::Package(m) => format!("{}:{}", m.repository_id, m.package_id),
            Material::Plugin(m) => m.plugin_id.clone(),
        }
    }

    /// Whether `key` names this material: its fingerprint, configured name
    /// or display name.
    pub fn matches_key(&self, key: &str) -> bool {
        self.name() == Some(key) || self.fingerprint() == key || self.display_name() == key
    }

    pub fn as_dependency(&self) -> Option<&DependencyMaterial> {
        match self {
            Material::Dependency(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self, Material::Dependency(_))
    }

    /// Whether any credential or configuration value carries a secret
    /// placeholder.
    pub fn has_secret_params(&self) -> bool {
        self.secret_bearing_values()
            .into_iter()
            .any(secrets::contains_secret_params)
    }

    /// Copy of this material with every secret-bearing value passed through
    /// `f`.
    pub fn map_secret_values<F>(&self, mut f: F) -> anyhow::Result<Material>
    where
        F: FnMut(&str) -> anyhow::Result<String>,
    {
        let mut copy = self.clone();
        match &mut copy {
            Material::Scm(m) => {
                m.url = f(&m.url)?;
                if let Some(username) = m.username.as_mut() {
                    *username = f(username)?;
                }
                if let Some(password) = m.password.as_mut() {
                    *password = f(password)?;
                }
            }
            Material::Plugin(m) => {
                for value in m.configuration.values_mut() {
                    *value = f(value)?;
                }
            }
            Material::Dependency(_) | Material::Package(_) => {}
        }
        Ok(copy)
    }

    fn secret_bearing_values(&self) -> Vec<&str> {
        match self {
            Material::Scm(m) => {
                let mut values = vec![m.url.as_str()];
                values.extend(m.username.as_deref());
                values.extend(m.password.as_deref());
                values
            }
            Material::Plugin(m) => m.configuration.values().map(String::as_str).collect(),
            Material::Dependency(_) | Material::Package(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.kind_name())
    }
}
