// src/exec/local.rs

//! In-process executor: task functions are looked up by name in the
//! [`FunctionRegistry`] and run on Tokio's blocking pool.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::Result;
use crate::exec::backend::{BoxFuture, Executor, TaskSpec};
use crate::exec::executor_loop::{Invocation, JobExecutor, TaskInvoker};
use crate::exec::registry::{ExecutorConstructor, ExecutorContext, FunctionRegistry};

pub const DEFAULT_SHELL: &str = "sh";

#[derive(Debug)]
pub struct LocalInvoker {
    functions: FunctionRegistry,
}

impl TaskInvoker for LocalInvoker {
    fn invoke<'a>(
        &'a self,
        spec: &'a TaskSpec,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> BoxFuture<'a, Invocation> {
        Box::pin(async move {
            let Some(function) = self.functions.get(&spec.function) else {
                return Invocation {
                    result: Err(format!("unknown function '{}'", spec.function)),
                    stdout: String::new(),
                    stderr: String::new(),
                };
            };

            debug!(node_id = spec.node_id, function = %spec.function, "calling local function");
            let result = match tokio::task::spawn_blocking(move || function(args, kwargs)).await {
                Ok(result) => result,
                Err(join_err) => Err(format!("task '{}' panicked: {join_err}", spec.function)),
            };
            Invocation {
                result,
                stdout: String::new(),
                stderr: String::new(),
            }
        })
    }
}

pub type LocalExecutor = JobExecutor<LocalInvoker>;

impl JobExecutor<LocalInvoker> {
    /// Build from a merged plugin config. Recognised key: `shell` (used for
    /// bash and pip hooks).
    pub fn from_config(ctx: &ExecutorContext, name: &str, config: &Value) -> Result<Self> {
        let shell = shell_from_config(config);
        let invoker = LocalInvoker {
            functions: ctx.functions.clone(),
        };
        Ok(JobExecutor::new(name, shell, invoker, ctx.clone()))
    }

    pub fn constructor() -> ExecutorConstructor {
        Arc::new(|ctx, name, config| {
            Ok(Arc::new(LocalExecutor::from_config(ctx, name, config)?) as Arc<dyn Executor>)
        })
    }
}

pub(crate) fn shell_from_config(config: &Value) -> String {
    config
        .get("shell")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SHELL)
        .to_string()
}
