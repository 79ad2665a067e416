// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_EXECUTOR: &str = "process";
pub const DEFAULT_WORKFLOW_EXECUTOR: &str = "local";

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [server]
/// node_event_queue_capacity = 256
/// export_wait_secs = 30
///
/// [storage]
/// db_path = "latticeflow.db"
///
/// [executors]
/// default = "process"
///
/// [executors.plugins.process]
/// kind = "process"
/// shell = "sh"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub executors: ExecutorsSection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub executors: ExecutorsSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            server: raw.server,
            storage: raw.storage,
            executors: raw.executors,
        }
    }
}

/// `[server]` section: queue sizes and export timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Capacity of the node-status event queue. Producers wait when full.
    #[serde(default = "default_queue_capacity")]
    pub node_event_queue_capacity: usize,

    /// Capacity of the job event queue.
    #[serde(default = "default_queue_capacity")]
    pub job_event_queue_capacity: usize,

    /// Upper bound for export in wait mode.
    #[serde(default = "default_export_wait_secs")]
    pub export_wait_secs: u64,

    /// Retry hint returned when a waited export times out.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_export_wait_secs() -> u64 {
    30
}

fn default_retry_after_secs() -> u64 {
    2
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            node_event_queue_capacity: default_queue_capacity(),
            job_event_queue_capacity: default_queue_capacity(),
            export_wait_secs: default_export_wait_secs(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    /// SQLite file; an in-memory database is used when absent.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Root directory for assets; a directory under the system temp dir
    /// is used when absent.
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
}

/// `[executors]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorsSection {
    /// Executor used by nodes (and lattices) that do not name one.
    #[serde(default = "default_executor")]
    pub default: String,

    /// Workflow executor used to build sublattices when a manifest does not
    /// name one.
    #[serde(default = "default_workflow_executor")]
    pub workflow_executor: String,

    /// Plugins keyed by the name nodes refer to.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

fn default_executor() -> String {
    DEFAULT_EXECUTOR.to_string()
}

fn default_workflow_executor() -> String {
    DEFAULT_WORKFLOW_EXECUTOR.to_string()
}

impl Default for ExecutorsSection {
    fn default() -> Self {
        Self {
            default: default_executor(),
            workflow_executor: default_workflow_executor(),
            plugins: BTreeMap::new(),
        }
    }
}

/// Built-in executor implementations a plugin can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Local,
    Process,
}

/// `[executors.plugins.<name>]` entry. Keys other than `kind` become the
/// plugin's default executor configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginConfig {
    pub kind: PluginKind,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl PluginConfig {
    pub fn new(kind: PluginKind) -> Self {
        Self {
            kind,
            options: Map::new(),
        }
    }

    pub fn defaults(&self) -> Value {
        Value::Object(self.options.clone())
    }
}
