// src/context.rs

//! Services shared by the engine, the task runner and the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigFile;
use crate::exec::registry::{ExecutorRegistry, WorkflowRegistry};
use crate::store::{AssetManager, Database};

/// Runtime settings derived from the configuration file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_executor: String,
    pub workflow_executor: String,
    pub export_wait: Duration,
    pub retry_after: Duration,
}

impl From<&ConfigFile> for Settings {
    fn from(cfg: &ConfigFile) -> Self {
        Self {
            default_executor: cfg.executors.default.clone(),
            workflow_executor: cfg.executors.workflow_executor.clone(),
            export_wait: Duration::from_secs(cfg.server.export_wait_secs),
            retry_after: Duration::from_secs(cfg.server.retry_after_secs),
        }
    }
}

/// Cheap to clone; every field is shared.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub db: Database,
    pub assets: AssetManager,
    pub executors: Arc<ExecutorRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub settings: Arc<Settings>,
}
