// src/config/validate.rs

use crate::config::model::{ConfigFile, PluginConfig, PluginKind, RawConfigFile};
use crate::errors::{DispatchError, Result};

/// Workflow executor name that would build sublattices on the client; it
/// cannot be served here.
pub const CLIENT_EXECUTOR: &str = "client";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DispatchError;

    fn try_from(mut raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        add_builtin_plugins(&mut raw);
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// `local` and `process` are always available unless redefined.
fn add_builtin_plugins(cfg: &mut RawConfigFile) {
    cfg.executors
        .plugins
        .entry("local".to_string())
        .or_insert_with(|| PluginConfig::new(PluginKind::Local));
    cfg.executors
        .plugins
        .entry("process".to_string())
        .or_insert_with(|| PluginConfig::new(PluginKind::Process));
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_server(cfg)?;
    validate_plugins(cfg)?;
    Ok(())
}

fn validate_server(cfg: &RawConfigFile) -> Result<()> {
    let server = &cfg.server;
    for (name, value) in [
        ("node_event_queue_capacity", server.node_event_queue_capacity as u64),
        ("job_event_queue_capacity", server.job_event_queue_capacity as u64),
        ("export_wait_secs", server.export_wait_secs),
    ] {
        if value == 0 {
            return Err(DispatchError::ConfigError(format!(
                "[server].{name} must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_plugins(cfg: &RawConfigFile) -> Result<()> {
    let executors = &cfg.executors;
    for name in executors.plugins.keys() {
        if name.trim().is_empty() {
            return Err(DispatchError::ConfigError(
                "executor plugin names must not be empty".to_string(),
            ));
        }
        if name == CLIENT_EXECUTOR {
            return Err(DispatchError::ConfigError(format!(
                "'{CLIENT_EXECUTOR}' is reserved and cannot be used as an executor plugin name"
            )));
        }
    }

    for (key, name) in [
        ("default", &executors.default),
        ("workflow_executor", &executors.workflow_executor),
    ] {
        if !executors.plugins.contains_key(name) {
            return Err(DispatchError::ConfigError(format!(
                "[executors].{key} refers to unknown plugin '{name}'"
            )));
        }
    }
    Ok(())
}
