// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a `RawConfigFile` into a `ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config, default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ExecutorsSection, PluginConfig, PluginKind, RawConfigFile, ServerSection,
    StorageSection,
};
pub use validate::CLIENT_EXECUTOR;
