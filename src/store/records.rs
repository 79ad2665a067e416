// src/store/records.rs

//! Row-level access to the `dispatches`, `nodes` and `edges` tables.
//!
//! Everything here takes a borrowed [`Connection`]; callers hold the
//! [`Database`](super::Database) lock for as long as they need a consistent
//! view.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::dag::graph::TaskGraph;
use crate::dag::manifest::WorkflowManifest;
use crate::dag::node::{Edge, EdgeAttrs, Node, NodeField};
use crate::errors::{DispatchError, Result};
use crate::types::{DispatchId, DispatchStatus, NodeId};

/// Link from a sublattice dispatch to the node that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub dispatch_id: DispatchId,
    pub node_id: NodeId,
    pub electron_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub dispatch_id: DispatchId,
    pub name: String,
    pub status: DispatchStatus,
    pub manifest: WorkflowManifest,
    pub result_uri: Option<String>,
    pub error: Option<String>,
    pub parent: Option<ParentLink>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl DispatchRecord {
    pub fn new(dispatch_id: DispatchId, manifest: WorkflowManifest) -> Self {
        Self {
            dispatch_id,
            name: manifest.name.clone(),
            status: DispatchStatus::NewObject,
            manifest,
            result_uri: None,
            error: None,
            parent: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }
}

/// Job metadata for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: i64,
    pub dispatch_id: DispatchId,
    pub node_id: NodeId,
    pub job_handle: Option<String>,
    pub status: String,
    pub cancel_requested: bool,
    pub cancel_successful: bool,
}

pub(crate) fn parse_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| DispatchError::Validation(format!("invalid timestamp '{s}': {e}")))
    })
    .transpose()
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(DispatchError::Validation)
}

// ---------------------------------------------------------------------------
// dispatches

pub fn insert_dispatch(conn: &Connection, record: &DispatchRecord) -> Result<()> {
    let manifest = serde_json::to_string(&record.manifest)?;
    let parent = record.parent.as_ref();
    conn.execute(
        "INSERT INTO dispatches (
            dispatch_id, name, status, manifest, result_uri, error,
            parent_dispatch_id, parent_node_id, parent_electron_id,
            created_at, start_time, end_time
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.dispatch_id,
            record.name,
            record.status.to_string(),
            manifest,
            record.result_uri,
            record.error,
            parent.map(|p| p.dispatch_id.clone()),
            parent.map(|p| p.node_id),
            parent.map(|p| p.electron_id.clone()),
            record.created_at.to_rfc3339(),
            record.start_time.map(|t| t.to_rfc3339()),
            record.end_time.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

struct DispatchRow {
    dispatch_id: String,
    name: String,
    status: String,
    manifest: String,
    result_uri: Option<String>,
    error: Option<String>,
    parent_dispatch_id: Option<String>,
    parent_node_id: Option<NodeId>,
    parent_electron_id: Option<String>,
    created_at: String,
    start_time: Option<String>,
    end_time: Option<String>,
}

impl TryFrom<DispatchRow> for DispatchRecord {
    type Error = DispatchError;

    fn try_from(row: DispatchRow) -> Result<Self> {
        let parent = match (row.parent_dispatch_id, row.parent_node_id) {
            (Some(dispatch_id), Some(node_id)) => Some(ParentLink {
                dispatch_id,
                node_id,
                electron_id: row.parent_electron_id.unwrap_or_default(),
            }),
            _ => None,
        };
        Ok(DispatchRecord {
            dispatch_id: row.dispatch_id,
            name: row.name,
            status: parse_status(&row.status)?,
            manifest: serde_json::from_str(&row.manifest)?,
            result_uri: row.result_uri,
            error: row.error,
            parent,
            created_at: parse_time(Some(row.created_at))?.unwrap_or_else(Utc::now),
            start_time: parse_time(row.start_time)?,
            end_time: parse_time(row.end_time)?,
        })
    }
}

pub fn get_dispatch(conn: &Connection, dispatch_id: &str) -> Result<DispatchRecord> {
    let row = conn
        .query_row(
            "SELECT dispatch_id, name, status, manifest, result_uri, error,
                    parent_dispatch_id, parent_node_id, parent_electron_id,
                    created_at, start_time, end_time
             FROM dispatches WHERE dispatch_id = ?1",
            params![dispatch_id],
            |row| {
                Ok(DispatchRow {
                    dispatch_id: row.get(0)?,
                    name: row.get(1)?,
                    status: row.get(2)?,
                    manifest: row.get(3)?,
                    result_uri: row.get(4)?,
                    error: row.get(5)?,
                    parent_dispatch_id: row.get(6)?,
                    parent_node_id: row.get(7)?,
                    parent_electron_id: row.get(8)?,
                    created_at: row.get(9)?,
                    start_time: row.get(10)?,
                    end_time: row.get(11)?,
                })
            },
        )
        .optional()?;
    match row {
        Some(row) => DispatchRecord::try_from(row),
        None => Err(DispatchError::DispatchNotFound(dispatch_id.to_string())),
    }
}

pub fn dispatch_exists(conn: &Connection, dispatch_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM dispatches WHERE dispatch_id = ?1",
            params![dispatch_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_dispatch_status(conn: &Connection, dispatch_id: &str) -> Result<DispatchStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM dispatches WHERE dispatch_id = ?1",
            params![dispatch_id],
            |row| row.get(0),
        )
        .optional()?;
    match status {
        Some(s) => parse_status(&s),
        None => Err(DispatchError::DispatchNotFound(dispatch_id.to_string())),
    }
}

/// Move a dispatch from `from` to `to` only if it is currently in `from`.
///
/// Returns whether the row changed. Entering `RUNNING` stamps `start_time`;
/// entering a terminal state stamps `end_time`.
pub fn transition_dispatch(
    conn: &Connection,
    dispatch_id: &str,
    from: DispatchStatus,
    to: DispatchStatus,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE dispatches SET
            status = ?3,
            start_time = CASE WHEN ?3 = 'RUNNING' THEN ?4 ELSE start_time END,
            end_time = CASE WHEN ?5 THEN ?4 ELSE end_time END
         WHERE dispatch_id = ?1 AND status = ?2",
        params![
            dispatch_id,
            from.to_string(),
            to.to_string(),
            now,
            to.is_terminal()
        ],
    )?;
    Ok(changed == 1)
}

/// Unconditionally set the dispatch status (and `end_time` when terminal).
pub fn set_dispatch_status(
    conn: &Connection,
    dispatch_id: &str,
    status: DispatchStatus,
) -> Result<()> {
    let end_time = status.is_terminal().then(|| Utc::now().to_rfc3339());
    let changed = conn.execute(
        "UPDATE dispatches SET status = ?2, end_time = COALESCE(?3, end_time)
         WHERE dispatch_id = ?1",
        params![dispatch_id, status.to_string(), end_time],
    )?;
    if changed == 0 {
        return Err(DispatchError::DispatchNotFound(dispatch_id.to_string()));
    }
    Ok(())
}

pub fn set_dispatch_outcome(
    conn: &Connection,
    dispatch_id: &str,
    result_uri: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE dispatches SET result_uri = COALESCE(?2, result_uri), error = COALESCE(?3, error)
         WHERE dispatch_id = ?1",
        params![dispatch_id, result_uri, error],
    )?;
    Ok(())
}

pub fn dispatch_ids_with_status(
    conn: &Connection,
    statuses: &[DispatchStatus],
) -> Result<Vec<DispatchId>> {
    let mut stmt =
        conn.prepare("SELECT dispatch_id FROM dispatches WHERE status = ?1 ORDER BY created_at")?;
    let mut out = Vec::new();
    for status in statuses {
        let ids = stmt
            .query_map(params![status.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.extend(ids);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// nodes and edges

const NODE_COLUMNS: &str = "node_id, name, kind, status, task_group_id, executor, hooks, \
     function_uri, start_time, end_time, output_uri, stdout_uri, stderr_uri, error, \
     sub_dispatch_id";

struct NodeRow {
    node_id: NodeId,
    name: String,
    kind: String,
    status: String,
    task_group_id: NodeId,
    executor: String,
    hooks: String,
    function_uri: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    output_uri: Option<String>,
    stdout_uri: Option<String>,
    stderr_uri: Option<String>,
    error: Option<String>,
    sub_dispatch_id: Option<String>,
}

impl NodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            node_id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            task_group_id: row.get(4)?,
            executor: row.get(5)?,
            hooks: row.get(6)?,
            function_uri: row.get(7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            output_uri: row.get(10)?,
            stdout_uri: row.get(11)?,
            stderr_uri: row.get(12)?,
            error: row.get(13)?,
            sub_dispatch_id: row.get(14)?,
        })
    }
}

impl TryFrom<NodeRow> for Node {
    type Error = DispatchError;

    fn try_from(row: NodeRow) -> Result<Self> {
        Ok(Node {
            node_id: row.node_id,
            name: row.name,
            kind: serde_json::from_str(&row.kind)?,
            status: parse_status(&row.status)?,
            task_group_id: row.task_group_id,
            executor: serde_json::from_str(&row.executor)?,
            hooks: serde_json::from_str(&row.hooks)?,
            function_uri: row.function_uri,
            start_time: parse_time(row.start_time)?,
            end_time: parse_time(row.end_time)?,
            output_uri: row.output_uri,
            stdout_uri: row.stdout_uri,
            stderr_uri: row.stderr_uri,
            error: row.error,
            sub_dispatch_id: row.sub_dispatch_id,
        })
    }
}

pub fn node_exists(conn: &Connection, dispatch_id: &str, node_id: NodeId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE dispatch_id = ?1 AND node_id = ?2",
            params![dispatch_id, node_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_node(conn: &Connection, dispatch_id: &str, node: &Node) -> Result<()> {
    if node_exists(conn, dispatch_id, node.node_id)? {
        return Err(DispatchError::DuplicateNode {
            dispatch_id: dispatch_id.to_string(),
            node_id: node.node_id,
        });
    }
    conn.execute(
        &format!(
            "INSERT INTO nodes (dispatch_id, {NODE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            dispatch_id,
            node.node_id,
            node.name,
            serde_json::to_string(&node.kind)?,
            node.status.to_string(),
            node.task_group_id,
            serde_json::to_string(&node.executor)?,
            serde_json::to_string(&node.hooks)?,
            node.function_uri,
            node.start_time.map(|t| t.to_rfc3339()),
            node.end_time.map(|t| t.to_rfc3339()),
            node.output_uri,
            node.stdout_uri,
            node.stderr_uri,
            node.error,
            node.sub_dispatch_id,
        ],
    )?;
    Ok(())
}

pub fn load_node(conn: &Connection, dispatch_id: &str, node_id: NodeId) -> Result<Node> {
    let row = conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE dispatch_id = ?1 AND node_id = ?2"),
            params![dispatch_id, node_id],
            NodeRow::from_row,
        )
        .optional()?;
    match row {
        Some(row) => Node::try_from(row),
        None => Err(DispatchError::NodeNotFound {
            dispatch_id: dispatch_id.to_string(),
            node_id,
        }),
    }
}

pub fn load_nodes(conn: &Connection, dispatch_id: &str) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE dispatch_id = ?1 ORDER BY node_id"
    ))?;
    let rows = stmt
        .query_map(params![dispatch_id], NodeRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(Node::try_from).collect()
}

pub fn node_ids(conn: &Connection, dispatch_id: &str) -> Result<Vec<NodeId>> {
    let mut stmt =
        conn.prepare("SELECT node_id FROM nodes WHERE dispatch_id = ?1 ORDER BY node_id")?;
    let ids = stmt
        .query_map(params![dispatch_id], |row| row.get::<_, NodeId>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Write the given fields of `node` in a single `UPDATE`.
pub fn update_node_fields(
    conn: &Connection,
    dispatch_id: &str,
    node: &Node,
    fields: &[NodeField],
) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", f.column(), i + 3))
        .collect();
    let sql = format!(
        "UPDATE nodes SET {} WHERE dispatch_id = ?1 AND node_id = ?2",
        assignments.join(", ")
    );

    let mut values: Vec<Option<String>> = Vec::with_capacity(fields.len());
    for field in fields {
        values.push(field.column_value(node));
    }
    let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&dispatch_id, &node.node_id];
    for v in &values {
        bound.push(v);
    }

    let changed = conn.execute(&sql, bound.as_slice())?;
    if changed == 0 {
        return Err(DispatchError::NodeNotFound {
            dispatch_id: dispatch_id.to_string(),
            node_id: node.node_id,
        });
    }
    Ok(())
}

pub fn insert_edge(conn: &Connection, dispatch_id: &str, edge: &Edge) -> Result<()> {
    for id in [edge.source, edge.target] {
        if !node_exists(conn, dispatch_id, id)? {
            return Err(DispatchError::NodeNotFound {
                dispatch_id: dispatch_id.to_string(),
                node_id: id,
            });
        }
    }
    let slot = edge
        .attrs
        .slot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO edges (dispatch_id, source, target, edge_name, slot)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![dispatch_id, edge.source, edge.target, edge.attrs.edge_name, slot],
    )?;
    Ok(())
}

fn query_edges(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, |row| {
            Ok((
                row.get::<_, NodeId>(0)?,
                row.get::<_, NodeId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(source, target, edge_name, slot)| {
            let slot = slot.map(|s| serde_json::from_str(&s)).transpose()?;
            Ok(Edge {
                source,
                target,
                attrs: EdgeAttrs { edge_name, slot },
            })
        })
        .collect()
}

pub fn load_edges(conn: &Connection, dispatch_id: &str) -> Result<Vec<Edge>> {
    query_edges(
        conn,
        "SELECT source, target, edge_name, slot FROM edges
         WHERE dispatch_id = ?1 ORDER BY edge_id",
        &[&dispatch_id],
    )
}

pub fn incoming_edges(conn: &Connection, dispatch_id: &str, node_id: NodeId) -> Result<Vec<Edge>> {
    query_edges(
        conn,
        "SELECT source, target, edge_name, slot FROM edges
         WHERE dispatch_id = ?1 AND target = ?2 ORDER BY edge_id",
        &[&dispatch_id, &node_id],
    )
}

pub fn outgoing_edges(conn: &Connection, dispatch_id: &str, node_id: NodeId) -> Result<Vec<Edge>> {
    query_edges(
        conn,
        "SELECT source, target, edge_name, slot FROM edges
         WHERE dispatch_id = ?1 AND source = ?2 ORDER BY edge_id",
        &[&dispatch_id, &node_id],
    )
}

/// Rebuild the full in-memory graph of a dispatch.
pub fn load_graph(conn: &Connection, dispatch_id: &str) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    for node in load_nodes(conn, dispatch_id)? {
        graph.add_node(node)?;
    }
    for edge in load_edges(conn, dispatch_id)? {
        graph.add_edge(edge.source, edge.target, edge.attrs)?;
    }
    Ok(graph)
}

/// Persist a new dispatch with its whole graph, atomically.
pub fn insert_dispatch_graph(
    conn: &mut Connection,
    record: &DispatchRecord,
    graph: &TaskGraph,
) -> Result<()> {
    let tx = conn.transaction()?;
    insert_dispatch(&tx, record)?;
    for node in graph.nodes() {
        insert_node(&tx, &record.dispatch_id, node)?;
    }
    for edge in graph.edges() {
        insert_edge(&tx, &record.dispatch_id, edge)?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::dag::manifest::{NodeSpec, OutputExpr, LatticeMetadata};
    use crate::dag::node::NodeKind;
    use crate::store::Database;

    fn manifest() -> WorkflowManifest {
        WorkflowManifest {
            name: "wf".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![
                NodeSpec::new(
                    0,
                    NodeKind::Parameter {
                        value: Value::from(2),
                    },
                ),
                NodeSpec::new(
                    1,
                    NodeKind::Task {
                        function: "double".into(),
                    },
                ),
            ],
            edges: vec![crate::dag::manifest::EdgeSpec {
                source: 0,
                target: 1,
                edge_name: "data".into(),
                slot: Some(crate::dag::node::ArgSlot::Positional(0)),
            }],
            output: OutputExpr::Node(1),
        }
    }

    #[test]
    fn dispatch_graph_round_trips() {
        let db = Database::in_memory().unwrap();
        let m = manifest();
        let graph = m.to_task_graph("local").unwrap();
        let record = DispatchRecord::new("d1".into(), m);

        insert_dispatch_graph(&mut db.conn(), &record, &graph).unwrap();

        let conn = db.conn();
        let loaded = load_graph(&conn, "d1").unwrap();
        assert_eq!(loaded, graph);

        let back = get_dispatch(&conn, "d1").unwrap();
        assert_eq!(back.status, DispatchStatus::NewObject);
        assert_eq!(back.manifest, record.manifest);
    }

    #[test]
    fn transition_only_fires_from_expected_state() {
        let db = Database::in_memory().unwrap();
        let m = manifest();
        let graph = m.to_task_graph("local").unwrap();
        insert_dispatch_graph(&mut db.conn(), &DispatchRecord::new("d1".into(), m), &graph)
            .unwrap();

        let conn = db.conn();
        assert!(
            transition_dispatch(&conn, "d1", DispatchStatus::NewObject, DispatchStatus::Running)
                .unwrap()
        );
        assert!(
            !transition_dispatch(&conn, "d1", DispatchStatus::NewObject, DispatchStatus::Running)
                .unwrap()
        );
        let rec = get_dispatch(&conn, "d1").unwrap();
        assert_eq!(rec.status, DispatchStatus::Running);
        assert!(rec.start_time.is_some());
        assert!(rec.end_time.is_none());
    }

    #[test]
    fn unknown_dispatch_is_not_found() {
        let db = Database::in_memory().unwrap();
        let err = get_dispatch(&db.conn(), "missing").unwrap_err();
        assert!(matches!(err, DispatchError::DispatchNotFound(_)));
    }
}
