// src/exec/hooks.rs

//! Dependency hooks run around a task: shell commands, pip installs and
//! registered callables.

use std::process::Stdio;

use anyhow::{Context, anyhow};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::debug;

use crate::dag::node::Node;
use crate::exec::backend::Hook;
use crate::exec::registry::FunctionRegistry;

/// Reassemble a node's serialized hooks into ordered before/after lists:
/// bash, then pip, then `call_before` in order; `call_after` in order.
pub fn gather_deps(node: &Node) -> (Vec<Hook>, Vec<Hook>) {
    let hooks = &node.hooks;
    let mut before = Vec::new();
    if !hooks.bash.is_empty() {
        before.push(Hook::Bash {
            commands: hooks.bash.clone(),
        });
    }
    if !hooks.pip.is_empty() {
        before.push(Hook::Pip {
            packages: hooks.pip.clone(),
        });
    }
    before.extend(hooks.call_before.iter().cloned().map(Hook::Call));
    let after = hooks.call_after.iter().cloned().map(Hook::Call).collect();
    (before, after)
}

/// Captured output of a hook sequence.
#[derive(Debug, Default)]
pub struct HookOutput {
    pub stdout: String,
    pub stderr: String,
    /// Return values of call hooks with a `retval_keyword`.
    pub injected: Map<String, Value>,
}

/// Run `hooks` in order, stopping at the first failure. Output captured
/// before a failure stays in `out`.
pub async fn run_hooks(
    hooks: &[Hook],
    functions: &FunctionRegistry,
    shell: &str,
    out: &mut HookOutput,
) -> anyhow::Result<()> {
    for hook in hooks {
        match hook {
            Hook::Bash { commands } => {
                for command in commands {
                    run_shell(shell, command, out).await?;
                }
            }
            Hook::Pip { packages } => {
                let command = format!("pip install {}", packages.join(" "));
                run_shell(shell, &command, out).await?;
            }
            Hook::Call(call) => {
                let function = functions
                    .get(&call.function)
                    .ok_or_else(|| anyhow!("unknown hook function '{}'", call.function))?;
                let value = function(call.args.clone(), call.kwargs.clone())
                    .map_err(|e| anyhow!("hook '{}' failed: {e}", call.function))?;
                if let Some(keyword) = &call.retval_keyword {
                    out.injected.insert(keyword.clone(), value);
                }
            }
        }
    }
    Ok(())
}

async fn run_shell(shell: &str, command: &str, out: &mut HookOutput) -> anyhow::Result<()> {
    debug!(%command, "running shell hook");
    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("spawning hook '{command}'"))?;

    out.stdout.push_str(&String::from_utf8_lossy(&output.stdout));
    out.stderr.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(anyhow!(
            "hook '{command}' exited with code {}",
            output.status.code().unwrap_or(-1)
        ));
    }
    Ok(())
}
