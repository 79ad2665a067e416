// src/store/transport_graph.rs

//! Graph-store view of one dispatch.
//!
//! A [`TransportGraph`] either caches the whole graph in memory
//! (materialized; used by the scheduler, which is the single writer for its
//! dispatch) or goes to SQLite on every call (bare; used for inspection and
//! by the task runner). Writes always reach the database. Both modes answer
//! every query identically.

use serde_json::Value;

use crate::dag::graph::TaskGraph;
use crate::dag::node::{Edge, EdgeAttrs, Node, NodeField};
use crate::errors::{DispatchError, Result};
use crate::store::{Database, records};
use crate::types::{DispatchId, NodeId};

#[derive(Debug, Clone)]
pub struct TransportGraph {
    db: Database,
    dispatch_id: DispatchId,
    cache: Option<TaskGraph>,
}

impl TransportGraph {
    /// Load the whole graph of `dispatch_id` into memory.
    pub fn materialized(db: Database, dispatch_id: impl Into<DispatchId>) -> Result<Self> {
        let dispatch_id = dispatch_id.into();
        let graph = {
            let conn = db.conn();
            if !records::dispatch_exists(&conn, &dispatch_id)? {
                return Err(DispatchError::DispatchNotFound(dispatch_id));
            }
            records::load_graph(&conn, &dispatch_id)?
        };
        Ok(Self {
            db,
            dispatch_id,
            cache: Some(graph),
        })
    }

    /// A view that reads through to the database on every call.
    pub fn bare(db: Database, dispatch_id: impl Into<DispatchId>) -> Self {
        Self {
            db,
            dispatch_id: dispatch_id.into(),
            cache: None,
        }
    }

    /// Switch a bare view to materialized mode.
    pub fn materialize(self) -> Result<Self> {
        if self.is_materialized() {
            return Ok(self);
        }
        Self::materialized(self.db, self.dispatch_id)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn is_materialized(&self) -> bool {
        self.cache.is_some()
    }

    pub fn dispatch_id(&self) -> &str {
        &self.dispatch_id
    }

    /// The in-memory graph, when materialized.
    pub fn cached(&self) -> Option<&TaskGraph> {
        self.cache.as_ref()
    }

    fn not_found(&self, node_id: NodeId) -> DispatchError {
        DispatchError::NodeNotFound {
            dispatch_id: self.dispatch_id.clone(),
            node_id,
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if let Some(cache) = &self.cache {
            if cache.contains(node.node_id) {
                return Err(DispatchError::DuplicateNode {
                    dispatch_id: self.dispatch_id.clone(),
                    node_id: node.node_id,
                });
            }
        }
        records::insert_node(&self.db.conn(), &self.dispatch_id, &node)?;
        if let Some(cache) = &mut self.cache {
            cache.add_node(node)?;
        }
        Ok(())
    }

    pub fn add_edge(&mut self, source: NodeId, target: NodeId, attrs: EdgeAttrs) -> Result<()> {
        let edge = Edge {
            source,
            target,
            attrs,
        };
        records::insert_edge(&self.db.conn(), &self.dispatch_id, &edge)?;
        if let Some(cache) = &mut self.cache {
            cache.add_edge(edge.source, edge.target, edge.attrs)?;
        }
        Ok(())
    }

    pub fn get_node(&self, node_id: NodeId) -> Result<Node> {
        match &self.cache {
            Some(cache) => cache.node(node_id).cloned().ok_or_else(|| self.not_found(node_id)),
            None => records::load_node(&self.db.conn(), &self.dispatch_id, node_id),
        }
    }

    /// Snapshots of several nodes; fails if any id is absent.
    pub fn get_nodes(&self, node_ids: &[NodeId]) -> Result<Vec<Node>> {
        match &self.cache {
            Some(_) => node_ids.iter().map(|id| self.get_node(*id)).collect(),
            None => {
                let conn = self.db.conn();
                node_ids
                    .iter()
                    .map(|id| records::load_node(&conn, &self.dispatch_id, *id))
                    .collect()
            }
        }
    }

    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        match &self.cache {
            Some(cache) => Ok(cache.node_ids().collect()),
            None => records::node_ids(&self.db.conn(), &self.dispatch_id),
        }
    }

    pub fn get_node_value(&self, node_id: NodeId, field: NodeField) -> Result<Value> {
        Ok(field.get(&self.get_node(node_id)?))
    }

    pub fn set_node_value(&mut self, node_id: NodeId, field: NodeField, value: Value) -> Result<()> {
        self.set_node_values(node_id, vec![(field, value)])
    }

    /// Update several fields of one node in a single statement.
    pub fn set_node_values(&mut self, node_id: NodeId, updates: Vec<(NodeField, Value)>) -> Result<()> {
        let fields: Vec<NodeField> = updates.iter().map(|(f, _)| *f).collect();

        let conn = self.db.conn();
        let mut node = match &self.cache {
            Some(cache) => cache.node(node_id).cloned().ok_or_else(|| self.not_found(node_id))?,
            None => records::load_node(&conn, &self.dispatch_id, node_id)?,
        };
        for (field, value) in updates {
            field.apply(&mut node, value)?;
        }
        records::update_node_fields(&conn, &self.dispatch_id, &node, &fields)?;
        drop(conn);

        if let Some(slot) = self.cache.as_mut().and_then(|c| c.node_mut(node_id)) {
            *slot = node;
        }
        Ok(())
    }

    /// Incoming edges of `node_id`, one entry per edge.
    pub fn get_incoming_edges(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        match &self.cache {
            Some(cache) => {
                if !cache.contains(node_id) {
                    return Err(self.not_found(node_id));
                }
                Ok(cache.incoming_edges(node_id).into_iter().cloned().collect())
            }
            None => {
                let conn = self.db.conn();
                if !records::node_exists(&conn, &self.dispatch_id, node_id)? {
                    return Err(self.not_found(node_id));
                }
                records::incoming_edges(&conn, &self.dispatch_id, node_id)
            }
        }
    }

    /// Outgoing edges of `node_id`, one entry per edge.
    pub fn get_successors(&self, node_id: NodeId) -> Result<Vec<Edge>> {
        match &self.cache {
            Some(cache) => {
                if !cache.contains(node_id) {
                    return Err(self.not_found(node_id));
                }
                Ok(cache.outgoing_edges(node_id).into_iter().cloned().collect())
            }
            None => {
                let conn = self.db.conn();
                if !records::node_exists(&conn, &self.dispatch_id, node_id)? {
                    return Err(self.not_found(node_id));
                }
                records::outgoing_edges(&conn, &self.dispatch_id, node_id)
            }
        }
    }

    /// Full in-memory copy of the graph.
    pub fn to_task_graph(&self) -> Result<TaskGraph> {
        match &self.cache {
            Some(cache) => Ok(cache.clone()),
            None => records::load_graph(&self.db.conn(), &self.dispatch_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::manifest::{LatticeMetadata, OutputExpr, WorkflowManifest};
    use crate::dag::node::{ExecutorSpec, NodeKind};
    use crate::store::DispatchRecord;
    use crate::types::NodeStatus;

    fn seeded_db() -> Database {
        let db = Database::in_memory().unwrap();
        let manifest = WorkflowManifest {
            name: "empty".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![],
            edges: vec![],
            output: OutputExpr::default(),
        };
        records::insert_dispatch(&db.conn(), &DispatchRecord::new("d".into(), manifest)).unwrap();
        db
    }

    fn task(id: NodeId) -> Node {
        Node::new(
            id,
            NodeKind::Task {
                function: "f".into(),
            },
            ExecutorSpec::named("local"),
        )
    }

    fn build(graph: &mut TransportGraph) {
        graph.add_node(task(0)).unwrap();
        graph.add_node(task(1)).unwrap();
        graph.add_edge(0, 1, EdgeAttrs::positional(0)).unwrap();
        graph.add_edge(0, 1, EdgeAttrs::keyword("again")).unwrap();
    }

    #[test]
    fn materialized_and_bare_agree() {
        let db = seeded_db();
        let mut mat = TransportGraph::materialized(db.clone(), "d").unwrap();
        build(&mut mat);
        mat.set_node_values(
            1,
            vec![
                (NodeField::Status, Value::from("COMPLETED")),
                (NodeField::OutputUri, Value::from("file:///x")),
            ],
        )
        .unwrap();

        let bare = TransportGraph::bare(db.clone(), "d");
        assert_eq!(mat.get_node(1).unwrap(), bare.get_node(1).unwrap());
        assert_eq!(
            mat.get_incoming_edges(1).unwrap(),
            bare.get_incoming_edges(1).unwrap()
        );
        assert_eq!(bare.get_successors(0).unwrap().len(), 2);
        assert_eq!(
            bare.get_node_value(1, NodeField::Status).unwrap(),
            Value::from("COMPLETED")
        );
        assert_eq!(mat.to_task_graph().unwrap(), bare.to_task_graph().unwrap());

        let reloaded = TransportGraph::materialized(db, "d").unwrap();
        assert_eq!(reloaded.get_node(1).unwrap().status, NodeStatus::Completed);
    }

    #[test]
    fn duplicate_and_missing_nodes_error_in_both_modes() {
        let db = seeded_db();
        let mut bare = TransportGraph::bare(db.clone(), "d");
        build(&mut bare);
        assert!(matches!(
            bare.add_node(task(0)),
            Err(DispatchError::DuplicateNode { node_id: 0, .. })
        ));

        let mut mat = TransportGraph::materialized(db, "d").unwrap();
        assert!(matches!(
            mat.add_node(task(1)),
            Err(DispatchError::DuplicateNode { node_id: 1, .. })
        ));
        for g in [&mat, &bare] {
            assert!(matches!(
                g.get_nodes(&[0, 9]),
                Err(DispatchError::NodeNotFound { node_id: 9, .. })
            ));
            assert!(g.get_incoming_edges(9).is_err());
        }
    }

    #[test]
    fn bare_writes_are_seen_by_bare_reads() {
        let db = seeded_db();
        let mut bare = TransportGraph::bare(db, "d");
        build(&mut bare);
        bare.set_node_value(0, NodeField::Error, Value::from("boom"))
            .unwrap();
        assert_eq!(bare.get_node(0).unwrap().error.as_deref(), Some("boom"));
    }
}
