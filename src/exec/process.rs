// src/exec/process.rs

//! Subprocess executor: a task's function is a shell command.
//!
//! The command receives `{"args": [...], "kwargs": {...}}` on stdin. On a
//! zero exit status the last non-empty stdout line is the JSON output (a
//! line that is not JSON is taken as a string). A non-zero exit fails the
//! task with its stderr as the error.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::backend::{BoxFuture, Executor, TaskSpec};
use crate::exec::executor_loop::{Invocation, JobExecutor, TaskInvoker};
use crate::exec::local::shell_from_config;
use crate::exec::registry::{ExecutorConstructor, ExecutorContext};

#[derive(Debug)]
pub struct ProcessInvoker {
    shell: String,
}

struct ProcessOutput {
    success: bool,
    code: i32,
    stdout: String,
    stderr: String,
}

impl ProcessInvoker {
    async fn run(&self, spec: &TaskSpec, payload: Value) -> AnyResult<ProcessOutput> {
        info!(node_id = spec.node_id, cmd = %spec.function, "starting task process");

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&spec.function)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", spec.name))?;

        // stdin is written while stdout and stderr drain.
        let bytes = serde_json::to_vec(&payload)?;
        let stdin = child.stdin.take();
        let node_id = spec.node_id;
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that ignores its input may close stdin early.
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!(node_id, error = %e, "task did not read its input");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.with_context(|| format!("waiting for process of task '{}'", spec.name))?;

        let code = output.status.code().unwrap_or(-1);
        info!(
            node_id = spec.node_id,
            exit_code = code,
            success = output.status.success(),
            "task process exited"
        );
        Ok(ProcessOutput {
            success: output.status.success(),
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Parse the last non-empty line of `stdout` as the task output.
pub fn parse_output(stdout: &str) -> Value {
    match stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())),
        None => Value::Null,
    }
}

impl TaskInvoker for ProcessInvoker {
    fn invoke<'a>(
        &'a self,
        spec: &'a TaskSpec,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> BoxFuture<'a, Invocation> {
        Box::pin(async move {
            let payload = json!({ "args": args, "kwargs": kwargs });
            match self.run(spec, payload).await {
                Ok(out) if out.success => Invocation {
                    result: Ok(parse_output(&out.stdout)),
                    stdout: out.stdout,
                    stderr: out.stderr,
                },
                Ok(out) => {
                    let trimmed = out.stderr.trim();
                    let error = if trimmed.is_empty() {
                        format!("process exited with code {}", out.code)
                    } else {
                        trimmed.to_string()
                    };
                    Invocation {
                        result: Err(error),
                        stdout: out.stdout,
                        stderr: out.stderr,
                    }
                }
                Err(e) => Invocation {
                    result: Err(format!("{e:#}")),
                    stdout: String::new(),
                    stderr: String::new(),
                },
            }
        })
    }
}

pub type ProcessExecutor = JobExecutor<ProcessInvoker>;

impl JobExecutor<ProcessInvoker> {
    /// Build from a merged plugin config. Recognised key: `shell`.
    pub fn from_config(ctx: &ExecutorContext, name: &str, config: &Value) -> Result<Self> {
        let shell = shell_from_config(config);
        let invoker = ProcessInvoker {
            shell: shell.clone(),
        };
        Ok(JobExecutor::new(name, shell, invoker, ctx.clone()))
    }

    pub fn constructor() -> ExecutorConstructor {
        Arc::new(|ctx, name, config| {
            Ok(Arc::new(ProcessExecutor::from_config(ctx, name, config)?) as Arc<dyn Executor>)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;

    fn spec(cmd: &str) -> TaskSpec {
        TaskSpec {
            node_id: 0,
            name: "t".into(),
            function: cmd.into(),
            function_uri: None,
            args: vec![],
            kwargs: BTreeMap::new(),
            before: vec![],
            after: vec![],
        }
    }

    fn invoker() -> ProcessInvoker {
        ProcessInvoker { shell: "sh".into() }
    }

    #[test]
    fn last_line_is_the_output() {
        assert_eq!(parse_output("log line\n{\"a\": 1}\n\n"), json!({"a": 1}));
        assert_eq!(parse_output("plain text"), json!("plain text"));
        assert_eq!(parse_output(""), Value::Null);
    }

    #[tokio::test]
    async fn stdin_carries_arguments() {
        let inv = invoker();
        let spec = spec("cat");
        let out = inv.invoke(&spec, vec![json!(1), json!("x")], Map::new()).await;
        assert_eq!(out.result.unwrap(), json!({"args": [1, "x"], "kwargs": {}}));
    }

    #[tokio::test]
    async fn large_input_and_output_do_not_block_each_other() {
        let inv = invoker();
        let spec = spec("cat");
        let big = "x".repeat(300_000);
        let out = tokio::time::timeout(
            Duration::from_secs(10),
            inv.invoke(&spec, vec![json!(big)], Map::new()),
        )
        .await
        .expect("process pipes deadlocked");
        let value = out.result.unwrap();
        assert_eq!(value["args"][0].as_str().map(str::len), Some(300_000));
        assert!(out.stdout.len() > 300_000);
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let inv = invoker();
        let spec = spec("echo 'ValueError: bad' >&2; exit 2");
        let out = inv.invoke(&spec, vec![], Map::new()).await;
        assert_eq!(out.result.unwrap_err(), "ValueError: bad");

        let silent = self::spec("exit 5");
        let out = inv.invoke(&silent, vec![], Map::new()).await;
        assert_eq!(out.result.unwrap_err(), "process exited with code 5");
    }
}
