// src/exec/registry.rs

//! Process-wide registries: executor plugins, task functions and
//! sublattice workflow builders.
//!
//! Executor plugins are registered at start-up (from `[executors.plugins]`
//! or programmatically) as constructors keyed by name. Instances are built
//! lazily on first lookup and cached per `(name, config)`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::dag::manifest::WorkflowManifest;
use crate::dag::node::ExecutorSpec;
use crate::errors::{DispatchError, Result};
use crate::exec::backend::{Executor, JobEventSender};
use crate::store::AssetManager;

/// A task function callable by the `local` executor and by call hooks.
pub type TaskFn =
    Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> std::result::Result<Value, String> + Send + Sync>;

/// Builds the manifest of a sublattice from its resolved inputs.
pub type WorkflowFn = Arc<
    dyn Fn(Vec<Value>, Map<String, Value>) -> std::result::Result<WorkflowManifest, String>
        + Send
        + Sync,
>;

/// Constructs an executor instance for a plugin name and merged config.
pub type ExecutorConstructor =
    Arc<dyn Fn(&ExecutorContext, &str, &Value) -> Result<Arc<dyn Executor>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, TaskFn>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    builders: HashMap<String, WorkflowFn>,
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("WorkflowRegistry")
            .field("builders", &names)
            .finish()
    }
}

impl WorkflowRegistry {
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> std::result::Result<WorkflowManifest, String>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(name.into(), Arc::new(builder));
    }

    /// Build the manifest of workflow `name`.
    pub fn build(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<WorkflowManifest> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| DispatchError::Validation(format!("unknown workflow '{name}'")))?;
        builder(args, kwargs).map_err(|e| {
            DispatchError::Validation(format!("building workflow '{name}' failed: {e}"))
        })
    }
}

/// Shared services handed to executor constructors.
#[derive(Clone)]
pub struct ExecutorContext {
    pub assets: AssetManager,
    pub functions: FunctionRegistry,
    pub job_events: JobEventSender,
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("assets", &self.assets)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

struct Plugin {
    constructor: ExecutorConstructor,
    defaults: Value,
}

pub struct ExecutorRegistry {
    ctx: ExecutorContext,
    plugins: BTreeMap<String, Plugin>,
    instances: Mutex<HashMap<(String, String), Arc<dyn Executor>>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ExecutorRegistry {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            plugins: BTreeMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) a plugin. `defaults` is merged under every
    /// per-node configuration.
    pub fn register(&mut self, name: impl Into<String>, constructor: ExecutorConstructor, defaults: Value) {
        let name = name.into();
        info!(executor = %name, "registered executor plugin");
        self.plugins.insert(
            name,
            Plugin {
                constructor,
                defaults,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    /// Instance for `spec`, constructing it on first use.
    pub fn get(&self, spec: &ExecutorSpec) -> Result<Arc<dyn Executor>> {
        let plugin = self.plugins.get(&spec.name).ok_or_else(|| {
            DispatchError::Executor(format!("no executor plugin named '{}'", spec.name))
        })?;
        let config = merge_config(&plugin.defaults, &spec.config)?;
        let key = (spec.name.clone(), serde_json::to_string(&config)?);

        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = instances.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let executor = (plugin.constructor)(&self.ctx, &spec.name, &config).map_err(|e| {
            DispatchError::Executor(format!("constructing executor '{}' failed: {e}", spec.name))
        })?;
        debug!(executor = %spec.name, config = %key.1, "constructed executor instance");
        instances.insert(key, Arc::clone(&executor));
        Ok(executor)
    }
}

/// Overlay `config` on top of `defaults`. Both must be tables (or null).
fn merge_config(defaults: &Value, config: &Value) -> Result<Value> {
    let mut merged = match defaults {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(DispatchError::Validation(format!(
                "executor defaults must be a table, got {other}"
            )));
        }
    };
    match config {
        Value::Null => {}
        Value::Object(map) => {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
        }
        other => {
            return Err(DispatchError::Validation(format!(
                "executor config must be a table, got {other}"
            )));
        }
    }
    Ok(Value::Object(merged))
}
