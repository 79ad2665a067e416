// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The task runner talks to an [`Executor`] through a fixed, URI-based
//! contract so that backends can run work out of process:
//!
//! - `send` submits a task group and returns an opaque job handle.
//! - `poll` reports whether the job is ready, failed, or will notify
//!   later through the job-event queue.
//! - `receive` returns per-node results with output/stdout/stderr URIs.
//! - `cancel` aborts an in-flight job.
//!
//! Tests can provide their own implementation that records submissions
//! without running anything.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::dag::node::DepsCall;
use crate::errors::Result;
use crate::types::{DispatchId, NodeId, NodeStatus};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque backend job identifier.
pub type JobHandle = String;

/// Identifies one submitted task group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupMetadata {
    pub dispatch_id: DispatchId,
    pub task_group_id: NodeId,
    /// Members in submission (topological) order.
    pub node_ids: Vec<NodeId>,
}

/// A task argument, passed by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputRef {
    /// Output of a node outside the group, already stored as an asset.
    Asset { uri: String },
    /// Output of an earlier member of the same group.
    Node { node_id: NodeId },
}

/// A pre- or post-execution hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hook {
    Bash { commands: Vec<String> },
    Pip { packages: Vec<String> },
    Call(DepsCall),
}

/// Everything an executor needs to run one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub node_id: NodeId,
    pub name: String,
    pub function: String,
    pub function_uri: Option<String>,
    pub args: Vec<InputRef>,
    pub kwargs: BTreeMap<String, InputRef>,
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

/// Assets the executor has to be able to read for a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMap {
    pub functions: BTreeMap<NodeId, String>,
    pub inputs: BTreeSet<String>,
}

/// Answer to [`Executor::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    /// Results can be received now.
    Ready,
    /// The job failed as a whole (infrastructure failure).
    Failed(String),
    /// The executor will publish a [`JobEvent`] once the job settles.
    Deferred,
}

/// Per-node outcome returned by [`Executor::receive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub output_uri: Option<String>,
    pub stdout_uri: Option<String>,
    pub stderr_uri: Option<String>,
    pub error: Option<String>,
}

/// Job-level status published on the job-event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub meta: TaskGroupMetadata,
    pub job_handle: JobHandle,
    pub status: JobStatus,
}

pub type JobEventSender = mpsc::Sender<JobEvent>;

/// Trait abstracting how task groups are executed.
pub trait Executor: Send + Sync {
    /// Plugin name this instance was built for.
    fn name(&self) -> &str;

    fn send<'a>(
        &'a self,
        specs: Vec<TaskSpec>,
        resources: ResourceMap,
        meta: &'a TaskGroupMetadata,
    ) -> BoxFuture<'a, Result<JobHandle>>;

    fn poll<'a>(&'a self, meta: &'a TaskGroupMetadata, handle: &'a str)
    -> BoxFuture<'a, Result<JobPoll>>;

    fn receive<'a>(
        &'a self,
        meta: &'a TaskGroupMetadata,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TaskResult>>>;

    /// Abort a job. Returns whether the abort was confirmed.
    fn cancel<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn get_upload_uri(&self, meta: &TaskGroupMetadata, object_key: &str) -> String;
}
