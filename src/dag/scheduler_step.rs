// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use crate::types::NodeId;

/// A task group whose dependencies are satisfied, ready for the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledGroup {
    pub task_group_id: NodeId,
    /// Members in topological order.
    pub node_ids: Vec<NodeId>,
}

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Groups that became ready (and were marked PENDING) in this step.
    pub newly_scheduled: Vec<ScheduledGroup>,
    /// Nodes moved straight to CANCELLED without being submitted.
    pub newly_cancelled: Vec<NodeId>,
    /// Whether every node is now terminal.
    pub dispatch_finished: bool,
}
