// src/exec/executor_loop.rs

//! Job bookkeeping shared by the built-in executors.
//!
//! A [`JobExecutor`] runs each submitted task group in its own Tokio task
//! and keeps, per job handle, either the live task (with a cancel channel)
//! or the finished results. Finished jobs announce themselves on the
//! job-event queue, so `poll` always answers [`JobPoll::Deferred`].
//!
//! What "calling the function" means is delegated to a [`TaskInvoker`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{DispatchError, Result};
use crate::exec::backend::{
    BoxFuture, Executor, InputRef, JobEvent, JobHandle, JobPoll, JobStatus, ResourceMap,
    TaskGroupMetadata, TaskResult, TaskSpec,
};
use crate::exec::hooks::{HookOutput, run_hooks};
use crate::exec::registry::ExecutorContext;
use crate::store::AssetManager;
use crate::types::{NodeId, NodeStatus};

/// Result of invoking one task function.
#[derive(Debug)]
pub struct Invocation {
    pub result: std::result::Result<Value, String>,
    pub stdout: String,
    pub stderr: String,
}

/// How a built-in executor runs the function of one task.
pub trait TaskInvoker: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        spec: &'a TaskSpec,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> BoxFuture<'a, Invocation>;
}

/// Internal handle for a job that is still running.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct JobTable {
    active: HashMap<JobHandle, ActiveJob>,
    finished: HashMap<JobHandle, Vec<TaskResult>>,
}

pub struct JobExecutor<I> {
    name: String,
    shell: String,
    invoker: Arc<I>,
    ctx: ExecutorContext,
    jobs: Arc<Mutex<JobTable>>,
}

impl<I> fmt::Debug for JobExecutor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("name", &self.name)
            .field("shell", &self.shell)
            .finish_non_exhaustive()
    }
}

impl<I: TaskInvoker> JobExecutor<I> {
    pub fn new(name: impl Into<String>, shell: impl Into<String>, invoker: I, ctx: ExecutorContext) -> Self {
        Self {
            name: name.into(),
            shell: shell.into(),
            invoker: Arc::new(invoker),
            ctx,
            jobs: Arc::new(Mutex::new(JobTable::default())),
        }
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        lock(&self.jobs)
    }

    /// Number of jobs still running.
    pub fn active_jobs(&self) -> usize {
        self.table()
            .active
            .values()
            .filter(|job| !job.handle.is_finished())
            .count()
    }

    /// Number of finished jobs whose results have not been received yet.
    pub fn unreceived_jobs(&self) -> usize {
        self.table().finished.len()
    }
}

fn lock(jobs: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<I: TaskInvoker> Executor for JobExecutor<I> {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        specs: Vec<TaskSpec>,
        _resources: ResourceMap,
        meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>> {
        Box::pin(async move {
            let job_handle = format!("{}-{}", self.name, Uuid::new_v4());
            let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

            let invoker = Arc::clone(&self.invoker);
            let ctx = self.ctx.clone();
            let shell = self.shell.clone();
            let jobs = Arc::clone(&self.jobs);
            let job_meta = meta.clone();
            let spawn_handle = job_handle.clone();

            // Hold the table lock across the spawn so the job cannot finish
            // and clean up before it has been registered.
            let mut table = self.table();
            let handle = tokio::spawn(async move {
                let results = tokio::select! {
                    results = run_job(invoker.as_ref(), &ctx, &shell, &job_meta, specs) => results,
                    _ = cancel_rx => {
                        info!(
                            dispatch_id = %job_meta.dispatch_id,
                            job = %spawn_handle,
                            "job cancelled"
                        );
                        job_meta
                            .node_ids
                            .iter()
                            .map(|id| status_only(*id, NodeStatus::Cancelled, None))
                            .collect()
                    }
                };

                {
                    let mut table = lock(&jobs);
                    table.active.remove(&spawn_handle);
                    table.finished.insert(spawn_handle.clone(), results);
                }

                let event = JobEvent {
                    meta: job_meta,
                    job_handle: spawn_handle.clone(),
                    status: JobStatus::Ready,
                };
                if ctx.job_events.send(event).await.is_err() {
                    debug!(job = %spawn_handle, "job event queue closed; dropping completion");
                }
            });
            table.active.insert(
                job_handle.clone(),
                ActiveJob {
                    cancel: Some(cancel_tx),
                    handle,
                },
            );
            drop(table);

            debug!(
                executor = %self.name,
                dispatch_id = %meta.dispatch_id,
                task_group_id = meta.task_group_id,
                job = %job_handle,
                "job submitted"
            );
            Ok(job_handle)
        })
    }

    fn poll<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<JobPoll>> {
        Box::pin(async move {
            let table = self.table();
            if table.active.contains_key(handle) || table.finished.contains_key(handle) {
                Ok(JobPoll::Deferred)
            } else {
                Err(DispatchError::Executor(format!("unknown job handle '{handle}'")))
            }
        })
    }

    /// Hand over a finished job's results. The job is forgotten afterwards.
    fn receive<'a>(
        &'a self,
        _meta: &'a TaskGroupMetadata,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>> {
        Box::pin(async move {
            self.table()
                .finished
                .remove(handle)
                .ok_or_else(|| DispatchError::Executor(format!("no results for job '{handle}'")))
        })
    }

    fn cancel<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut table = self.table();
            if let Some(job) = table.active.get_mut(handle) {
                return match job.cancel.take() {
                    Some(cancel) => Ok(cancel.send(()).is_ok()),
                    None => {
                        debug!(job = %handle, "cancel already requested");
                        Ok(true)
                    }
                };
            }
            if table.finished.contains_key(handle) {
                debug!(job = %handle, "job already finished; nothing to cancel");
                return Ok(false);
            }
            Err(DispatchError::Executor(format!("unknown job handle '{handle}'")))
        })
    }

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, object_key: &str) -> String {
        self.ctx.assets.upload_uri(&meta.dispatch_id, object_key)
    }
}

fn status_only(node_id: NodeId, status: NodeStatus, error: Option<String>) -> TaskResult {
    TaskResult {
        node_id,
        status,
        output_uri: None,
        stdout_uri: None,
        stderr_uri: None,
        error,
    }
}

/// Run the members of a group in order. Once a member fails, the rest are
/// reported CANCELLED without running.
async fn run_job<I: TaskInvoker + ?Sized>(
    invoker: &I,
    ctx: &ExecutorContext,
    shell: &str,
    meta: &TaskGroupMetadata,
    specs: Vec<TaskSpec>,
) -> Vec<TaskResult> {
    let mut outputs: HashMap<NodeId, Value> = HashMap::new();
    let mut results = Vec::with_capacity(specs.len());
    let mut upstream_failed = false;

    for spec in specs {
        if upstream_failed {
            results.push(status_only(spec.node_id, NodeStatus::Cancelled, None));
            continue;
        }
        let (result, output) = run_one(invoker, ctx, shell, meta, &spec, &outputs).await;
        if let Some(value) = output {
            outputs.insert(spec.node_id, value);
        }
        if result.status != NodeStatus::Completed {
            warn!(
                dispatch_id = %meta.dispatch_id,
                node_id = spec.node_id,
                error = ?result.error,
                "task failed"
            );
            upstream_failed = true;
        }
        results.push(result);
    }
    results
}

async fn run_one<I: TaskInvoker + ?Sized>(
    invoker: &I,
    ctx: &ExecutorContext,
    shell: &str,
    meta: &TaskGroupMetadata,
    spec: &TaskSpec,
    outputs: &HashMap<NodeId, Value>,
) -> (TaskResult, Option<Value>) {
    let mut stdout = String::new();
    let mut stderr = String::new();

    let outcome = async {
        let mut before = HookOutput::default();
        let hooks_ran = run_hooks(&spec.before, &ctx.functions, shell, &mut before).await;
        stdout.push_str(&before.stdout);
        stderr.push_str(&before.stderr);
        hooks_ran.map_err(|e| format!("{e:#}"))?;

        let args = spec
            .args
            .iter()
            .map(|input| resolve(&ctx.assets, input, outputs))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut kwargs = Map::new();
        for (key, input) in &spec.kwargs {
            kwargs.insert(key.clone(), resolve(&ctx.assets, input, outputs)?);
        }
        kwargs.extend(before.injected);

        let invocation = invoker.invoke(spec, args, kwargs).await;
        stdout.push_str(&invocation.stdout);
        stderr.push_str(&invocation.stderr);
        let value = invocation.result?;

        let mut after = HookOutput::default();
        let hooks_ran = run_hooks(&spec.after, &ctx.functions, shell, &mut after).await;
        stdout.push_str(&after.stdout);
        stderr.push_str(&after.stderr);
        hooks_ran.map_err(|e| format!("{e:#}"))?;
        Ok::<Value, String>(value)
    }
    .await;

    let assets = &ctx.assets;
    let stream_uris = store_streams(assets, meta, spec.node_id, &stdout, &stderr);
    let (stdout_uri, stderr_uri) = match stream_uris {
        Ok(uris) => uris,
        Err(e) => {
            let error = format!("storing task streams failed: {e}");
            return (status_only(spec.node_id, NodeStatus::Failed, Some(error)), None);
        }
    };

    let result = match outcome {
        Ok(value) => {
            let key = AssetManager::node_key(spec.node_id, "output.json");
            match assets.store_json(&meta.dispatch_id, Some(spec.node_id), &key, &value) {
                Ok(record) => {
                    let result = TaskResult {
                        node_id: spec.node_id,
                        status: NodeStatus::Completed,
                        output_uri: Some(record.uri),
                        stdout_uri,
                        stderr_uri,
                        error: None,
                    };
                    return (result, Some(value));
                }
                Err(e) => TaskResult {
                    node_id: spec.node_id,
                    status: NodeStatus::Failed,
                    output_uri: None,
                    stdout_uri,
                    stderr_uri,
                    error: Some(format!("storing task output failed: {e}")),
                },
            }
        }
        Err(error) => TaskResult {
            node_id: spec.node_id,
            status: NodeStatus::Failed,
            output_uri: None,
            stdout_uri,
            stderr_uri,
            error: Some(error),
        },
    };
    (result, None)
}

fn resolve(
    assets: &AssetManager,
    input: &InputRef,
    outputs: &HashMap<NodeId, Value>,
) -> std::result::Result<Value, String> {
    match input {
        InputRef::Asset { uri } => assets
            .load_json(uri)
            .map_err(|e| format!("loading input {uri} failed: {e}")),
        InputRef::Node { node_id } => outputs
            .get(node_id)
            .cloned()
            .ok_or_else(|| format!("output of group member {node_id} is not available")),
    }
}

fn store_streams(
    assets: &AssetManager,
    meta: &TaskGroupMetadata,
    node_id: NodeId,
    stdout: &str,
    stderr: &str,
) -> Result<(Option<String>, Option<String>)> {
    let out = assets.store_text(
        &meta.dispatch_id,
        Some(node_id),
        &AssetManager::node_key(node_id, "stdout.txt"),
        stdout,
    )?;
    let err = assets.store_text(
        &meta.dispatch_id,
        Some(node_id),
        &AssetManager::node_key(node_id, "stderr.txt"),
        stderr,
    )?;
    Ok((Some(out.uri), Some(err.uri)))
}
