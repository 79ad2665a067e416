// src/dag/node.rs

//! Node and edge records of a task graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DispatchError, Result};
use crate::types::{DispatchId, NodeId, NodeStatus};

/// What a node executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Call a named function on the selected executor.
    Task { function: String },
    /// A literal input value; completes without an executor.
    Parameter { value: Value },
    /// A nested workflow built at run time from the named builder.
    Sublattice { workflow: String },
}

impl NodeKind {
    /// Name used when the manifest does not give one.
    pub fn default_name(&self) -> String {
        match self {
            NodeKind::Task { function } => function.clone(),
            NodeKind::Parameter { value } => format!(":parameter:{value}"),
            NodeKind::Sublattice { workflow } => format!(":sublattice:{workflow}"),
        }
    }

    pub fn parameter_value(&self) -> Option<&Value> {
        match self {
            NodeKind::Parameter { value } => Some(value),
            _ => None,
        }
    }
}

/// Executor selection: plugin name plus per-node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

impl ExecutorSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Value::Null,
        }
    }
}

/// A callable hook run before or after a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepsCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// When set, the hook's return value is passed to the task under this
    /// keyword argument.
    #[serde(default)]
    pub retval_keyword: Option<String>,
}

/// Serialized dependency hooks attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeHooks {
    #[serde(default)]
    pub bash: Vec<String>,
    #[serde(default)]
    pub pip: Vec<String>,
    #[serde(default)]
    pub call_before: Vec<DepsCall>,
    #[serde(default)]
    pub call_after: Vec<DepsCall>,
}

/// One task in the graph (an "electron").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub task_group_id: NodeId,
    pub executor: ExecutorSpec,
    #[serde(default)]
    pub hooks: NodeHooks,
    #[serde(default)]
    pub function_uri: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_uri: Option<String>,
    #[serde(default)]
    pub stdout_uri: Option<String>,
    #[serde(default)]
    pub stderr_uri: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sub_dispatch_id: Option<DispatchId>,
}

impl Node {
    pub fn new(node_id: NodeId, kind: NodeKind, executor: ExecutorSpec) -> Self {
        Self {
            node_id,
            name: kind.default_name(),
            kind,
            status: NodeStatus::NewObject,
            task_group_id: node_id,
            executor,
            hooks: NodeHooks::default(),
            function_uri: None,
            start_time: None,
            end_time: None,
            output_uri: None,
            stdout_uri: None,
            stderr_uri: None,
            error: None,
            sub_dispatch_id: None,
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter { .. })
    }

    pub fn is_sublattice(&self) -> bool {
        matches!(self.kind, NodeKind::Sublattice { .. })
    }
}

/// Mutable per-node fields addressable through the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeField {
    Status,
    StartTime,
    EndTime,
    OutputUri,
    StdoutUri,
    StderrUri,
    Error,
    SubDispatchId,
}

impl NodeField {
    pub const ALL: [NodeField; 8] = [
        NodeField::Status,
        NodeField::StartTime,
        NodeField::EndTime,
        NodeField::OutputUri,
        NodeField::StdoutUri,
        NodeField::StderrUri,
        NodeField::Error,
        NodeField::SubDispatchId,
    ];

    /// Column backing this field in the `nodes` table.
    pub fn column(self) -> &'static str {
        match self {
            NodeField::Status => "status",
            NodeField::StartTime => "start_time",
            NodeField::EndTime => "end_time",
            NodeField::OutputUri => "output_uri",
            NodeField::StdoutUri => "stdout_uri",
            NodeField::StderrUri => "stderr_uri",
            NodeField::Error => "error",
            NodeField::SubDispatchId => "sub_dispatch_id",
        }
    }

    pub fn get(self, node: &Node) -> Value {
        let value = match self {
            NodeField::Status => serde_json::to_value(node.status),
            NodeField::StartTime => serde_json::to_value(node.start_time),
            NodeField::EndTime => serde_json::to_value(node.end_time),
            NodeField::OutputUri => serde_json::to_value(&node.output_uri),
            NodeField::StdoutUri => serde_json::to_value(&node.stdout_uri),
            NodeField::StderrUri => serde_json::to_value(&node.stderr_uri),
            NodeField::Error => serde_json::to_value(&node.error),
            NodeField::SubDispatchId => serde_json::to_value(&node.sub_dispatch_id),
        };
        value.unwrap_or(Value::Null)
    }

    /// Write `value` into the typed field of `node`.
    pub fn apply(self, node: &mut Node, value: Value) -> Result<()> {
        match self {
            NodeField::Status => node.status = serde_json::from_value(value)?,
            NodeField::StartTime => node.start_time = serde_json::from_value(value)?,
            NodeField::EndTime => node.end_time = serde_json::from_value(value)?,
            NodeField::OutputUri => node.output_uri = serde_json::from_value(value)?,
            NodeField::StdoutUri => node.stdout_uri = serde_json::from_value(value)?,
            NodeField::StderrUri => node.stderr_uri = serde_json::from_value(value)?,
            NodeField::Error => node.error = serde_json::from_value(value)?,
            NodeField::SubDispatchId => node.sub_dispatch_id = serde_json::from_value(value)?,
        }
        Ok(())
    }

    /// Storage representation of the field's current value on `node`.
    pub fn column_value(self, node: &Node) -> Option<String> {
        match self {
            NodeField::Status => Some(node.status.to_string()),
            NodeField::StartTime => node.start_time.map(|t| t.to_rfc3339()),
            NodeField::EndTime => node.end_time.map(|t| t.to_rfc3339()),
            NodeField::OutputUri => node.output_uri.clone(),
            NodeField::StdoutUri => node.stdout_uri.clone(),
            NodeField::StderrUri => node.stderr_uri.clone(),
            NodeField::Error => node.error.clone(),
            NodeField::SubDispatchId => node.sub_dispatch_id.clone(),
        }
    }
}

impl std::str::FromStr for NodeField {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        NodeField::ALL
            .into_iter()
            .find(|f| f.column() == s)
            .ok_or_else(|| DispatchError::Validation(format!("unknown node field '{s}'")))
    }
}

/// Argument slot an edge feeds on its target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSlot {
    Positional(usize),
    Keyword(String),
}

/// Immutable attributes of an edge.
///
/// `slot == None` marks a pure ordering (wait-for) dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeAttrs {
    pub edge_name: String,
    #[serde(default)]
    pub slot: Option<ArgSlot>,
}

impl EdgeAttrs {
    pub fn positional(index: usize) -> Self {
        Self {
            edge_name: "data".to_string(),
            slot: Some(ArgSlot::Positional(index)),
        }
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Self {
            edge_name: "data".to_string(),
            slot: Some(ArgSlot::Keyword(name.into())),
        }
    }

    pub fn wait_for() -> Self {
        Self {
            edge_name: "wait_for".to_string(),
            slot: None,
        }
    }
}

/// A directed edge `source -> target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub attrs: EdgeAttrs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_nodes_get_placeholder_names() {
        let node = Node::new(
            3,
            NodeKind::Parameter {
                value: Value::from(5),
            },
            ExecutorSpec::named("local"),
        );
        assert_eq!(node.name, ":parameter:5");
        assert_eq!(node.task_group_id, 3);
        assert!(node.is_parameter());
    }

    #[test]
    fn field_get_and_apply_agree() {
        let mut node = Node::new(
            0,
            NodeKind::Task {
                function: "f".into(),
            },
            ExecutorSpec::named("local"),
        );
        NodeField::Status
            .apply(&mut node, Value::from("RUNNING"))
            .unwrap();
        NodeField::OutputUri
            .apply(&mut node, Value::from("file:///tmp/out.json"))
            .unwrap();
        assert_eq!(node.status, NodeStatus::Running);
        assert_eq!(NodeField::Status.get(&node), Value::from("RUNNING"));
        assert_eq!(
            NodeField::OutputUri.column_value(&node).as_deref(),
            Some("file:///tmp/out.json")
        );
        assert!(NodeField::Status.apply(&mut node, Value::from(1)).is_err());
    }

    #[test]
    fn field_names_parse() {
        let f: NodeField = "sub_dispatch_id".parse().unwrap();
        assert_eq!(f, NodeField::SubDispatchId);
        assert!("nope".parse::<NodeField>().is_err());
    }
}
