// src/exec/job_manager.rs

//! Job metadata rows: one per submitted node, holding the backend job
//! handle and the cancellation flags observed by the task runner. Rows are
//! created when a node's group is submitted, or earlier by a cancel
//! request that may race that submission.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{DispatchError, Result};
use crate::store::JobRecord;
use crate::types::NodeId;

const JOB_COLUMNS: &str =
    "job_id, dispatch_id, node_id, job_handle, status, cancel_requested, cancel_successful";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.get(0)?,
        dispatch_id: row.get(1)?,
        node_id: row.get(2)?,
        job_handle: row.get(3)?,
        status: row.get(4)?,
        cancel_requested: row.get(5)?,
        cancel_successful: row.get(6)?,
    })
}

/// Make sure every node has a job row. Existing rows, and any cancel
/// request on them, are kept.
pub fn ensure_jobs(conn: &Connection, dispatch_id: &str, node_ids: &[NodeId]) -> Result<()> {
    let mut stmt =
        conn.prepare("INSERT OR IGNORE INTO jobs (dispatch_id, node_id) VALUES (?1, ?2)")?;
    for node_id in node_ids {
        stmt.execute(params![dispatch_id, node_id])?;
    }
    Ok(())
}

fn update_one(conn: &Connection, dispatch_id: &str, node_id: NodeId, sql: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
    let changed = conn.execute(sql, params![dispatch_id, node_id, value])?;
    if changed == 0 {
        return Err(DispatchError::NodeNotFound {
            dispatch_id: dispatch_id.to_string(),
            node_id,
        });
    }
    Ok(())
}

pub fn set_job_handle(conn: &Connection, dispatch_id: &str, node_id: NodeId, handle: &str) -> Result<()> {
    update_one(
        conn,
        dispatch_id,
        node_id,
        "UPDATE jobs SET job_handle = ?3 WHERE dispatch_id = ?1 AND node_id = ?2",
        &handle,
    )
}

pub fn set_job_status(conn: &Connection, dispatch_id: &str, node_id: NodeId, status: &str) -> Result<()> {
    update_one(
        conn,
        dispatch_id,
        node_id,
        "UPDATE jobs SET status = ?3 WHERE dispatch_id = ?1 AND node_id = ?2",
        &status,
    )
}

/// Flag the given nodes for cancellation, creating their job rows if
/// needed. Unknown node ids are ignored.
pub fn set_cancel_requested(conn: &Connection, dispatch_id: &str, node_ids: &[NodeId]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO jobs (dispatch_id, node_id, cancel_requested)
         SELECT dispatch_id, node_id, 1 FROM nodes WHERE dispatch_id = ?1 AND node_id = ?2
         ON CONFLICT (dispatch_id, node_id) DO UPDATE SET cancel_requested = 1",
    )?;
    for node_id in node_ids {
        stmt.execute(params![dispatch_id, node_id])?;
    }
    Ok(())
}

pub fn set_cancel_result(conn: &Connection, dispatch_id: &str, node_id: NodeId, successful: bool) -> Result<()> {
    update_one(
        conn,
        dispatch_id,
        node_id,
        "UPDATE jobs SET cancel_successful = ?3 WHERE dispatch_id = ?1 AND node_id = ?2",
        &successful,
    )
}

pub fn get_job_metadata(conn: &Connection, dispatch_id: &str, node_id: NodeId) -> Result<JobRecord> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE dispatch_id = ?1 AND node_id = ?2"),
        params![dispatch_id, node_id],
        job_from_row,
    )
    .optional()?
    .ok_or_else(|| DispatchError::NodeNotFound {
        dispatch_id: dispatch_id.to_string(),
        node_id,
    })
}

/// Job rows of `node_ids`. Nodes that were never submitted have none and
/// are skipped.
pub fn get_jobs_metadata(conn: &Connection, dispatch_id: &str, node_ids: &[NodeId]) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE dispatch_id = ?1 AND node_id = ?2"
    ))?;
    let mut jobs = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        if let Some(job) = stmt
            .query_row(params![dispatch_id, node_id], job_from_row)
            .optional()?
        {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// Whether cancellation was requested for any of `node_ids`.
pub fn any_cancel_requested(conn: &Connection, dispatch_id: &str, node_ids: &[NodeId]) -> Result<bool> {
    Ok(get_jobs_metadata(conn, dispatch_id, node_ids)?
        .iter()
        .any(|job| job.cancel_requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::manifest::{LatticeMetadata, NodeSpec, OutputExpr, WorkflowManifest};
    use crate::dag::node::NodeKind;
    use crate::store::{Database, DispatchRecord, records};

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        let manifest = WorkflowManifest {
            name: "wf".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![
                NodeSpec::new(0, NodeKind::Task { function: "f".into() }),
                NodeSpec::new(1, NodeKind::Task { function: "g".into() }),
            ],
            edges: vec![],
            output: OutputExpr::default(),
        };
        let graph = manifest.to_task_graph("local").unwrap();
        records::insert_dispatch_graph(&mut db.conn(), &DispatchRecord::new("d".into(), manifest), &graph)
            .unwrap();
        db
    }

    #[test]
    fn job_rows_track_handles_and_cancellation() {
        let db = db();
        let conn = db.conn();
        ensure_jobs(&conn, "d", &[0]).unwrap();

        set_job_handle(&conn, "d", 0, "local-1").unwrap();
        set_job_status(&conn, "d", 0, "RUNNING").unwrap();
        assert!(!any_cancel_requested(&conn, "d", &[0, 1]).unwrap());

        // Node 1 was never submitted; the cancel request creates its row.
        set_cancel_requested(&conn, "d", &[1, 42]).unwrap();
        set_cancel_result(&conn, "d", 1, true).unwrap();

        let jobs = get_jobs_metadata(&conn, "d", &[0, 1, 42]).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_handle.as_deref(), Some("local-1"));
        assert_eq!(jobs[0].status, "RUNNING");
        assert!(!jobs[0].cancel_requested);
        assert!(jobs[1].cancel_requested && jobs[1].cancel_successful);
        assert!(any_cancel_requested(&conn, "d", &[0, 1]).unwrap());

        // Submitting after the request keeps the flag.
        ensure_jobs(&conn, "d", &[1]).unwrap();
        assert!(get_job_metadata(&conn, "d", 1).unwrap().cancel_requested);
    }

    #[test]
    fn rows_exist_only_for_submitted_nodes() {
        let db = db();
        let conn = db.conn();
        assert!(get_jobs_metadata(&conn, "d", &[0, 1]).unwrap().is_empty());
        assert!(matches!(
            get_job_metadata(&conn, "d", 0),
            Err(DispatchError::NodeNotFound { node_id: 0, .. })
        ));
        assert!(set_job_handle(&conn, "d", 0, "h").is_err());

        ensure_jobs(&conn, "d", &[0]).unwrap();
        assert_eq!(get_jobs_metadata(&conn, "d", &[0, 1]).unwrap().len(), 1);
    }
}
