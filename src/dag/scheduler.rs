use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::errors::Result;
use crate::store::TransportGraph;
use crate::tracker::{Aggregate, NodeResult, aggregate_status, apply_node_result};
use crate::types::{NodeId, NodeStatus};

/// First unsuccessful node of a dispatch, used for the dispatch error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstFailure {
    pub node_id: NodeId,
    pub error: String,
}

/// Per-dispatch scheduling state over a materialized graph.
///
/// The scheduler is the only writer of node statuses for its dispatch.
/// Readiness is always recomputed from the current graph state, so
/// out-of-order or duplicated results cannot schedule a group twice.
#[derive(Debug)]
pub struct Scheduler {
    graph: TransportGraph,
    first_failure: Option<FirstFailure>,
    finished: bool,
}

impl Scheduler {
    /// Wrap `graph`, materializing it first if needed.
    pub fn new(graph: TransportGraph) -> Result<Self> {
        Ok(Self {
            graph: graph.materialize()?,
            first_failure: None,
            finished: false,
        })
    }

    pub fn dispatch_id(&self) -> &str {
        self.graph.dispatch_id()
    }

    pub fn graph(&self) -> &TransportGraph {
        &self.graph
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn first_failure(&self) -> Option<&FirstFailure> {
        self.first_failure.as_ref()
    }

    /// Current status of every node.
    pub fn statuses(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.graph
            .cached()
            .map(|g| g.nodes().map(|n| (n.node_id, n.status)).collect())
            .unwrap_or_default()
    }

    /// Aggregate of the current node statuses.
    pub fn aggregate(&self) -> Aggregate {
        aggregate_status(self.statuses().into_values())
    }

    /// Seed the dispatch: skip descendants of nodes that are already
    /// unsuccessful (cancelled before start) and schedule the initial
    /// ready groups. Nodes reused from an earlier dispatch are already
    /// COMPLETED and count as satisfied dependencies.
    pub fn start(&mut self) -> Result<SchedulerStep> {
        let unsuccessful: Vec<NodeId> = self
            .statuses()
            .into_iter()
            .filter(|(_, s)| matches!(s, NodeStatus::Failed | NodeStatus::Cancelled))
            .map(|(id, _)| id)
            .collect();

        let mut manager = StateManager::new(&mut self.graph);
        let mut newly_cancelled = Vec::new();
        for id in unsuccessful {
            newly_cancelled.extend(manager.cascade_cancel(id)?);
        }
        let newly_scheduled = manager.collect_ready_groups()?;
        let dispatch_finished = self.maybe_finish()?;

        info!(
            dispatch_id = %self.dispatch_id(),
            scheduled = newly_scheduled.len(),
            "scheduler started"
        );
        Ok(SchedulerStep {
            newly_scheduled,
            newly_cancelled,
            dispatch_finished,
        })
    }

    /// Apply one node result and return what changed.
    pub fn apply(&mut self, result: &NodeResult) -> Result<SchedulerStep> {
        if self.finished {
            warn!(
                dispatch_id = %self.dispatch_id(),
                node_id = result.node_id,
                "result for finished dispatch; ignoring"
            );
            return Ok(SchedulerStep::default());
        }

        if !apply_node_result(&mut self.graph, result)? {
            return Ok(SchedulerStep::default());
        }

        let mut newly_cancelled = Vec::new();
        let mut newly_scheduled = Vec::new();
        let mut manager = StateManager::new(&mut self.graph);

        match result.status {
            NodeStatus::Completed => {
                newly_scheduled = manager.collect_ready_groups()?;
            }
            NodeStatus::Failed | NodeStatus::Cancelled => {
                if result.status == NodeStatus::Failed && self.first_failure.is_none() {
                    self.first_failure = Some(FirstFailure {
                        node_id: result.node_id,
                        error: result.error.clone().unwrap_or_default(),
                    });
                }
                newly_cancelled = manager.cascade_cancel(result.node_id)?;
            }
            NodeStatus::NewObject | NodeStatus::Pending | NodeStatus::Running => {}
        }

        let dispatch_finished = self.maybe_finish()?;
        Ok(SchedulerStep {
            newly_scheduled,
            newly_cancelled,
            dispatch_finished,
        })
    }

    /// Cancel nodes that have not been submitted yet. `None` targets every
    /// node. Submitted nodes are left to the runner's abort path.
    pub fn cancel_unsubmitted(&mut self, node_ids: Option<&[NodeId]>) -> Result<SchedulerStep> {
        if self.finished {
            return Ok(SchedulerStep::default());
        }

        let targets: Vec<NodeId> = match node_ids {
            Some(ids) => ids.to_vec(),
            None => self.statuses().into_keys().collect(),
        };

        let mut manager = StateManager::new(&mut self.graph);
        let mut newly_cancelled = manager.cancel_nodes(&targets)?;
        for id in newly_cancelled.clone() {
            newly_cancelled.extend(manager.cascade_cancel(id)?);
        }
        debug!(
            dispatch_id = %self.dispatch_id(),
            cancelled = ?newly_cancelled,
            "cancelled unsubmitted nodes"
        );

        let dispatch_finished = self.maybe_finish()?;
        Ok(SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_cancelled,
            dispatch_finished,
        })
    }

    fn maybe_finish(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if StateManager::new(&mut self.graph).all_nodes_terminal()? {
            info!(
                dispatch_id = %self.dispatch_id(),
                "all nodes terminal; dispatch finished"
            );
            self.finished = true;
            return Ok(true);
        }
        Ok(false)
    }
}
