// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::node::{Edge, EdgeAttrs, Node};
use crate::errors::{DispatchError, Result};
use crate::types::NodeId;

/// In-memory task graph: an arena of nodes keyed by id plus an ordered edge
/// list with per-node incoming/outgoing indices.
///
/// Parallel edges are kept; a node that feeds two argument slots of the same
/// successor appears twice in that successor's incoming list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    incoming: BTreeMap<NodeId, Vec<usize>>,
    outgoing: BTreeMap<NodeId, Vec<usize>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Fails if the id is already taken.
    ///
    /// The dispatch id in the error is left empty; the store fills it in
    /// when it surfaces the failure.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        let node_id = node.node_id;
        if self.nodes.contains_key(&node_id) {
            return Err(DispatchError::DuplicateNode {
                dispatch_id: String::new(),
                node_id,
            });
        }
        self.nodes.insert(node_id, node);
        self.incoming.entry(node_id).or_default();
        self.outgoing.entry(node_id).or_default();
        Ok(())
    }

    pub fn add_edge(&mut self, source: NodeId, target: NodeId, attrs: EdgeAttrs) -> Result<()> {
        for id in [source, target] {
            if !self.nodes.contains_key(&id) {
                return Err(DispatchError::NodeNotFound {
                    dispatch_id: String::new(),
                    node_id: id,
                });
            }
        }
        let idx = self.edges.len();
        self.edges.push(Edge {
            source,
            target,
            attrs,
        });
        self.outgoing.entry(source).or_default().push(idx);
        self.incoming.entry(target).or_default().push(idx);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edge_list(self.incoming.get(&node_id))
    }

    pub fn outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edge_list(self.outgoing.get(&node_id))
    }

    fn edge_list(&self, idx: Option<&Vec<usize>>) -> Vec<&Edge> {
        idx.map(|v| v.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Predecessors, once per incoming edge.
    pub fn parents(&self, node_id: NodeId) -> Vec<NodeId> {
        self.incoming_edges(node_id)
            .into_iter()
            .map(|e| e.source)
            .collect()
    }

    /// Distinct successors in first-seen order.
    pub fn children(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        self.outgoing_edges(node_id)
            .into_iter()
            .map(|e| e.target)
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Sorted attributes of every edge `source -> target`.
    pub fn edge_attrs_between(&self, source: NodeId, target: NodeId) -> Vec<EdgeAttrs> {
        let mut attrs: Vec<EdgeAttrs> = self
            .outgoing_edges(source)
            .into_iter()
            .filter(|e| e.target == target)
            .map(|e| e.attrs.clone())
            .collect();
        attrs.sort();
        attrs
    }

    /// Nodes without predecessors, in ascending id order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| self.incoming.get(id).is_none_or(|v| v.is_empty()))
            .collect()
    }

    /// Every node reachable from `start`, excluding `start` itself.
    pub fn descendants(&self, start: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack = self.children(start);
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.children(id));
            }
        }
        seen
    }

    /// Fail with [`DispatchError::DagCycle`] if the graph has a cycle.
    pub fn validate_acyclic(&self) -> Result<()> {
        self.topo_order(None).map(|_| ())
    }

    /// Topological order of the whole graph, or of `subset` when given.
    pub fn topo_order(&self, subset: Option<&BTreeSet<NodeId>>) -> Result<Vec<NodeId>> {
        let keep = |id: &NodeId| subset.is_none_or(|s| s.contains(id));

        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        for id in self.nodes.keys().filter(|id| keep(id)) {
            graph.add_node(*id);
        }
        for edge in &self.edges {
            if keep(&edge.source) && keep(&edge.target) {
                graph.add_edge(edge.source, edge.target, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            DispatchError::DagCycle(format!(
                "cycle detected in task graph involving node {}",
                cycle.node_id()
            ))
        })
    }
}
