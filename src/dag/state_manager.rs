// src/dag/state_manager.rs

//! Readiness and cascade logic over a dispatch's materialized graph.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::dag::graph::TaskGraph;
use crate::dag::node::NodeField;
use crate::dag::scheduler_step::ScheduledGroup;
use crate::errors::{DispatchError, Result};
use crate::store::TransportGraph;
use crate::types::{NodeId, NodeStatus};

/// Mutating view used by the scheduler.
pub struct StateManager<'a> {
    graph: &'a mut TransportGraph,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a mut TransportGraph) -> Self {
        Self { graph }
    }

    fn view(&self) -> Result<&TaskGraph> {
        self.graph.cached().ok_or_else(|| {
            DispatchError::Validation("scheduler requires a materialized graph".to_string())
        })
    }

    /// Move every NEW_OBJECT node that can no longer run because of `from`
    /// to CANCELLED: its descendants, the other members of its task group,
    /// and transitively the descendants and group siblings of each node
    /// cancelled on the way.
    ///
    /// Returns the nodes that were changed. Nodes that are already
    /// submitted or terminal keep their state.
    pub fn cascade_cancel(&mut self, from: NodeId) -> Result<Vec<NodeId>> {
        let targets: Vec<NodeId> = {
            let view = self.view()?;
            let groups = ReadOnlyStateManager::new(view).groups();
            let is_new = |id: NodeId| view.node(id).is_some_and(|n| n.status == NodeStatus::NewObject);

            let mut seen = BTreeSet::from([from]);
            let mut stack = vec![from];
            let mut targets = Vec::new();
            while let Some(id) = stack.pop() {
                let siblings = view
                    .node(id)
                    .and_then(|n| groups.get(&n.task_group_id))
                    .into_iter()
                    .flatten()
                    .copied();
                for next in view.descendants(id).into_iter().chain(siblings) {
                    if seen.insert(next) && is_new(next) {
                        targets.push(next);
                        stack.push(next);
                    }
                }
            }
            targets.sort_unstable();
            targets
        };
        self.cancel_nodes(&targets)?;
        if !targets.is_empty() {
            debug!(
                dispatch_id = %self.graph.dispatch_id(),
                node_id = from,
                cancelled = ?targets,
                "skipping nodes blocked by unsuccessful node"
            );
        }
        Ok(targets)
    }

    /// Move the given NEW_OBJECT nodes to CANCELLED. Nodes in any other state
    /// are left alone.
    pub fn cancel_nodes(&mut self, node_ids: &[NodeId]) -> Result<Vec<NodeId>> {
        let now = serde_json::to_value(Utc::now())?;
        let mut changed = Vec::new();
        for &id in node_ids {
            let status = self.view()?.node(id).map(|n| n.status);
            if status == Some(NodeStatus::NewObject) {
                self.graph.set_node_values(
                    id,
                    vec![
                        (NodeField::Status, Value::from(NodeStatus::Cancelled.as_str())),
                        (NodeField::EndTime, now.clone()),
                    ],
                )?;
                changed.push(id);
            }
        }
        Ok(changed)
    }

    /// Collect groups that are ready, mark their members PENDING and return
    /// them. A group is returned at most once because its members leave
    /// NEW_OBJECT here.
    pub fn collect_ready_groups(&mut self) -> Result<Vec<ScheduledGroup>> {
        let ready: Vec<ScheduledGroup> = {
            let view = self.view()?;
            let ro = ReadOnlyStateManager::new(view);
            let mut ready = Vec::new();
            for (group_id, members) in ro.groups() {
                if ro.group_ready(&members) {
                    let node_ids = view.topo_order(Some(&members))?;
                    ready.push(ScheduledGroup {
                        task_group_id: group_id,
                        node_ids,
                    });
                }
            }
            ready
        };

        let pending = Value::from(NodeStatus::Pending.as_str());
        for group in &ready {
            for &id in &group.node_ids {
                self.graph
                    .set_node_value(id, NodeField::Status, pending.clone())?;
            }
            info!(
                dispatch_id = %self.graph.dispatch_id(),
                task_group_id = group.task_group_id,
                nodes = ?group.node_ids,
                "task group ready; marking PENDING"
            );
        }
        Ok(ready)
    }

    pub fn all_nodes_terminal(&self) -> Result<bool> {
        Ok(ReadOnlyStateManager::new(self.view()?).all_nodes_terminal())
    }
}

/// Read-only readiness checks over a graph snapshot.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a TaskGraph,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a TaskGraph) -> Self {
        Self { graph }
    }

    /// Members of every task group, keyed by group id.
    pub fn groups(&self) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
        let mut groups: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for node in self.graph.nodes() {
            groups
                .entry(node.task_group_id)
                .or_default()
                .insert(node.node_id);
        }
        groups
    }

    /// A group is ready when all members are NEW_OBJECT and every
    /// predecessor outside the group has COMPLETED.
    pub fn group_ready(&self, members: &BTreeSet<NodeId>) -> bool {
        let status_of = |id: NodeId| self.graph.node(id).map(|n| n.status);

        if !members
            .iter()
            .all(|id| status_of(*id) == Some(NodeStatus::NewObject))
        {
            return false;
        }

        members.iter().all(|id| {
            self.graph
                .parents(*id)
                .into_iter()
                .filter(|p| !members.contains(p))
                .all(|p| status_of(p) == Some(NodeStatus::Completed))
        })
    }

    pub fn all_nodes_terminal(&self) -> bool {
        self.graph.nodes().all(|n| n.status.is_terminal())
    }
}
