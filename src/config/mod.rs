// src/config/mod.rs

//! Pipeline configuration.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: dependency, cycle and settings checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigFile, PipelineConfig, RawConfigFile, SettingsSection};
pub use validate::validate_config;
