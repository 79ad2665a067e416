// src/tracker/mod.rs

//! Node and dispatch status bookkeeping.
//!
//! [`apply_node_result`] is the only place node statuses change after
//! registration. It is idempotent: a duplicate or stale result is rejected
//! without touching the store.

pub mod postprocess;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::dag::node::NodeField;
use crate::errors::{DispatchError, Result};
use crate::store::TransportGraph;
use crate::types::{DispatchId, NodeId, NodeStatus};

pub use postprocess::{PostprocessError, postprocess};

/// A status report for one node, produced by the task runner or the
/// scheduler itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_uri: Option<String>,
    pub stdout_uri: Option<String>,
    pub stderr_uri: Option<String>,
    pub error: Option<String>,
    pub sub_dispatch_id: Option<DispatchId>,
}

impl NodeResult {
    pub fn new(node_id: NodeId, status: NodeStatus) -> Self {
        let now = Utc::now();
        Self {
            node_id,
            status,
            start_time: (status == NodeStatus::Running).then_some(now),
            end_time: status.is_terminal().then_some(now),
            output_uri: None,
            stdout_uri: None,
            stderr_uri: None,
            error: None,
            sub_dispatch_id: None,
        }
    }

    pub fn running(node_id: NodeId) -> Self {
        Self::new(node_id, NodeStatus::Running)
    }

    pub fn completed(node_id: NodeId, output_uri: impl Into<String>) -> Self {
        Self {
            output_uri: Some(output_uri.into()),
            ..Self::new(node_id, NodeStatus::Completed)
        }
    }

    pub fn failed(node_id: NodeId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(node_id, NodeStatus::Failed)
        }
    }

    pub fn cancelled(node_id: NodeId) -> Self {
        Self::new(node_id, NodeStatus::Cancelled)
    }

    pub fn with_streams(mut self, stdout_uri: Option<String>, stderr_uri: Option<String>) -> Self {
        self.stdout_uri = stdout_uri;
        self.stderr_uri = stderr_uri;
        self
    }

    pub fn with_sub_dispatch(mut self, sub_dispatch_id: impl Into<DispatchId>) -> Self {
        self.sub_dispatch_id = Some(sub_dispatch_id.into());
        self
    }
}

fn opt<T: serde::Serialize>(value: &Option<T>) -> Result<Value> {
    serde_json::to_value(value).map_err(DispatchError::from)
}

/// Apply `result` to the graph if it moves the node forward.
///
/// Returns `Ok(false)` (and writes nothing) for duplicates, regressions and
/// results for nodes that are already terminal. All written fields go out
/// in one update so readers never see a status without its output.
pub fn apply_node_result(graph: &mut TransportGraph, result: &NodeResult) -> Result<bool> {
    let current = graph.get_node(result.node_id)?;
    if !current.status.can_transition_to(result.status) {
        trace!(
            dispatch_id = %graph.dispatch_id(),
            node_id = result.node_id,
            current = %current.status,
            ignored = %result.status,
            "ignoring non-forward node status update"
        );
        return Ok(false);
    }

    let mut updates = vec![(NodeField::Status, serde_json::to_value(result.status)?)];
    if result.start_time.is_some() && current.start_time.is_none() {
        updates.push((NodeField::StartTime, opt(&result.start_time)?));
    }
    if result.end_time.is_some() {
        updates.push((NodeField::EndTime, opt(&result.end_time)?));
    }
    if result.status == NodeStatus::Completed {
        updates.push((NodeField::OutputUri, opt(&result.output_uri)?));
    }
    if result.status == NodeStatus::Failed {
        updates.push((NodeField::Error, opt(&result.error)?));
    }
    if result.stdout_uri.is_some() {
        updates.push((NodeField::StdoutUri, opt(&result.stdout_uri)?));
    }
    if result.stderr_uri.is_some() {
        updates.push((NodeField::StderrUri, opt(&result.stderr_uri)?));
    }
    if result.sub_dispatch_id.is_some() {
        updates.push((NodeField::SubDispatchId, opt(&result.sub_dispatch_id)?));
    }

    graph.set_node_values(result.node_id, updates)?;
    debug!(
        dispatch_id = %graph.dispatch_id(),
        node_id = result.node_id,
        from = %current.status,
        to = %result.status,
        "node status updated"
    );
    Ok(true)
}

/// Dispatch-level view of a node status multiset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Running,
    Failed,
    Cancelled,
    AllCompleted,
}

/// Failure wins over cancellation, which wins over completion. Anything
/// still in flight keeps the dispatch running.
pub fn aggregate_status<I>(statuses: I) -> Aggregate
where
    I: IntoIterator<Item = NodeStatus>,
{
    let mut any_failed = false;
    let mut any_cancelled = false;
    let mut all_completed = true;

    for status in statuses {
        match status {
            NodeStatus::Failed => any_failed = true,
            NodeStatus::Cancelled => any_cancelled = true,
            NodeStatus::Completed => {}
            _ => all_completed = false,
        }
    }

    if any_failed {
        Aggregate::Failed
    } else if any_cancelled {
        Aggregate::Cancelled
    } else if all_completed {
        Aggregate::AllCompleted
    } else {
        Aggregate::Running
    }
}
