// src/dag/manifest.rs

//! Workflow manifests: the serialized form of a task graph as submitted by
//! a client, plus the postprocessing expression that combines node outputs
//! into the dispatch result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::graph::TaskGraph;
use crate::dag::node::{ArgSlot, DepsCall, EdgeAttrs, ExecutorSpec, Node, NodeHooks, NodeKind};
use crate::errors::{DispatchError, Result};
use crate::types::NodeId;

/// Pre-execution dependencies shared by the lattice or set per node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pip: Option<Vec<String>>,
}

/// Lattice-level metadata. Unset fields fall back to configured defaults
/// (or, for sublattices, to the parent node's metadata).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_executor: Option<String>,
    #[serde(default)]
    pub deps: DepsSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_before: Option<Vec<DepsCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_after: Option<Vec<DepsCall>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_group_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorSpec>,
    #[serde(default)]
    pub deps: DepsSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_before: Option<Vec<DepsCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_after: Option<Vec<DepsCall>>,
}

impl NodeSpec {
    pub fn new(node_id: NodeId, kind: NodeKind) -> Self {
        Self {
            node_id,
            name: None,
            kind,
            task_group_id: None,
            executor: None,
            deps: DepsSpec::default(),
            call_before: None,
            call_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default = "default_edge_name")]
    pub edge_name: String,
    #[serde(default)]
    pub slot: Option<ArgSlot>,
}

fn default_edge_name() -> String {
    "data".to_string()
}

/// Postprocessing expression evaluated once every node has completed.
///
/// Node references are replaced by the node's output; parameter nodes
/// resolve to their literal value since that is their output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputExpr {
    Node(NodeId),
    /// Element `key` of a node output (object field or array index).
    Index { node: NodeId, key: Value },
    Literal(Value),
    List(Vec<OutputExpr>),
    Dict(BTreeMap<String, OutputExpr>),
}

impl Default for OutputExpr {
    fn default() -> Self {
        OutputExpr::Literal(Value::Null)
    }
}

impl OutputExpr {
    /// Node ids referenced anywhere in the expression.
    pub fn referenced_nodes(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                OutputExpr::Node(id) | OutputExpr::Index { node: id, .. } => {
                    out.insert(*id);
                }
                OutputExpr::Literal(_) => {}
                OutputExpr::List(items) => stack.extend(items.iter()),
                OutputExpr::Dict(items) => stack.extend(items.values()),
            }
        }
        out
    }
}

/// A complete workflow as submitted for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowManifest {
    pub name: String,
    #[serde(default)]
    pub metadata: LatticeMetadata,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub output: OutputExpr,
}

impl WorkflowManifest {
    /// Build and validate the task graph described by this manifest.
    ///
    /// Node-level settings win over lattice metadata, which wins over
    /// `default_executor`.
    pub fn to_task_graph(&self, default_executor: &str) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        let lattice_executor = self
            .metadata
            .executor
            .clone()
            .unwrap_or_else(|| ExecutorSpec::named(default_executor));

        for spec in &self.nodes {
            let executor = spec
                .executor
                .clone()
                .unwrap_or_else(|| lattice_executor.clone());
            let mut node = Node::new(spec.node_id, spec.kind.clone(), executor);
            if let Some(name) = &spec.name {
                node.name = name.clone();
            }
            node.task_group_id = spec.task_group_id.unwrap_or(spec.node_id);
            node.hooks = self.hooks_for(spec);

            graph.add_node(node).map_err(|_| {
                DispatchError::Validation(format!(
                    "duplicate node id {} in workflow '{}'",
                    spec.node_id, self.name
                ))
            })?;
        }

        for edge in &self.edges {
            let attrs = EdgeAttrs {
                edge_name: edge.edge_name.clone(),
                slot: edge.slot.clone(),
            };
            graph
                .add_edge(edge.source, edge.target, attrs)
                .map_err(|_| {
                    DispatchError::Validation(format!(
                        "edge {} -> {} references an unknown node",
                        edge.source, edge.target
                    ))
                })?;
        }

        graph.validate_acyclic()?;
        validate_output(&graph, &self.output)?;
        validate_task_groups(&graph)?;
        Ok(graph)
    }

    fn hooks_for(&self, spec: &NodeSpec) -> NodeHooks {
        let meta = &self.metadata;
        NodeHooks {
            bash: spec
                .deps
                .bash
                .clone()
                .or_else(|| meta.deps.bash.clone())
                .unwrap_or_default(),
            pip: spec
                .deps
                .pip
                .clone()
                .or_else(|| meta.deps.pip.clone())
                .unwrap_or_default(),
            call_before: spec
                .call_before
                .clone()
                .or_else(|| meta.call_before.clone())
                .unwrap_or_default(),
            call_after: spec
                .call_after
                .clone()
                .or_else(|| meta.call_after.clone())
                .unwrap_or_default(),
        }
    }

    /// Fill every unset metadata field from `parent`.
    pub fn inherit_metadata(&mut self, parent: &LatticeMetadata) {
        let meta = &mut self.metadata;
        if meta.executor.is_none() {
            meta.executor = parent.executor.clone();
        }
        if meta.workflow_executor.is_none() {
            meta.workflow_executor = parent.workflow_executor.clone();
        }
        if meta.deps.bash.is_none() {
            meta.deps.bash = parent.deps.bash.clone();
        }
        if meta.deps.pip.is_none() {
            meta.deps.pip = parent.deps.pip.clone();
        }
        if meta.call_before.is_none() {
            meta.call_before = parent.call_before.clone();
        }
        if meta.call_after.is_none() {
            meta.call_after = parent.call_after.clone();
        }
    }
}

fn validate_output(graph: &TaskGraph, output: &OutputExpr) -> Result<()> {
    for id in output.referenced_nodes() {
        if !graph.contains(id) {
            return Err(DispatchError::Validation(format!(
                "output expression references unknown node {id}"
            )));
        }
    }
    Ok(())
}

/// Task groups must share one executor, parameter and sublattice nodes must
/// be alone in their group, and no path may leave a group and re-enter it
/// (the group is submitted as one unit, so that would deadlock).
pub fn validate_task_groups(graph: &TaskGraph) -> Result<()> {
    let mut groups: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for node in graph.nodes() {
        groups
            .entry(node.task_group_id)
            .or_default()
            .insert(node.node_id);
    }

    for (group_id, members) in &groups {
        let nodes: Vec<&Node> = members.iter().filter_map(|id| graph.node(*id)).collect();

        if members.len() > 1 {
            if let Some(special) = nodes.iter().find(|n| n.is_parameter() || n.is_sublattice()) {
                return Err(DispatchError::Validation(format!(
                    "node {} must be the only member of its task group {group_id}",
                    special.node_id
                )));
            }
        }

        if let Some(first) = nodes.first() {
            if nodes.iter().any(|n| n.executor != first.executor) {
                return Err(DispatchError::Validation(format!(
                    "task group {group_id} mixes executors"
                )));
            }
        }

        let outside: BTreeSet<NodeId> = members
            .iter()
            .flat_map(|id| graph.descendants(*id))
            .filter(|id| !members.contains(id))
            .collect();
        for id in outside {
            if graph.descendants(id).iter().any(|d| members.contains(d)) {
                return Err(DispatchError::Validation(format!(
                    "task group {group_id} is not convex: node {id} lies between its members"
                )));
            }
        }
    }

    Ok(())
}
