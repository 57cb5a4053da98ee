// src/config/mod.rs

//! Batch-file configuration.
//!
//! - `model.rs`: the TOML-backed data model and the resolved [`JobSpec`].
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` validation and resolution.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, DefaultSection, JobConfig, JobSpec, RawConfigFile};
