// src/secrets.rs

//! Secret placeholders in material configuration.
//!
//! Placeholders look like `{{SECRET:[config_id][key]}}`. They are resolved
//! into a copy of the material right before it is polled; resolved copies
//! are never stored or put into a build cause.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::material::Material;
use crate::ports::SecretResolver;

static SECRET_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{SECRET:\[([^\]]+)\]\[([^\]]+)\]\}\}").expect("secret placeholder regex is valid")
});

/// A `(config_id, key)` reference found in a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretParam {
    pub config_id: String,
    pub key: String,
}

pub fn contains_secret_params(value: &str) -> bool {
    SECRET_PARAM.is_match(value)
}

/// All secret references in `value`, in order of appearance.
pub fn secret_params(value: &str) -> Vec<SecretParam> {
    SECRET_PARAM
        .captures_iter(value)
        .map(|caps| SecretParam {
            config_id: caps[1].to_string(),
            key: caps[2].to_string(),
        })
        .collect()
}

/// Replace every placeholder in `value` using `lookup`.
pub fn substitute<F>(value: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(&SecretParam) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in SECRET_PARAM.captures_iter(value) {
        let whole = caps.get(0).ok_or_else(|| anyhow!("empty secret capture"))?;
        let param = SecretParam {
            config_id: caps[1].to_string(),
            key: caps[2].to_string(),
        };
        let secret = lookup(&param).ok_or_else(|| {
            anyhow!(
                "secret '{}' not found in secret config '{}'",
                param.key,
                param.config_id
            )
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&secret);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}

/// Secret resolver backed by an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct MapSecretResolver {
    secrets: HashMap<(String, String), String>,
}

impl MapSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        config_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets
            .insert((config_id.into(), key.into()), value.into());
        self
    }
}

impl SecretResolver for MapSecretResolver {
    fn resolve(&self, material: &Material) -> Result<Material> {
        material.map_secret_values(|value| {
            substitute(value, |param| {
                self.secrets
                    .get(&(param.config_id.clone(), param.key.clone()))
                    .cloned()
            })
        })
    }
}
