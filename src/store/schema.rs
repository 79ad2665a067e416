// src/store/schema.rs

use rusqlite::Connection;

use crate::errors::Result;

/// Create all tables and indexes if they do not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS dispatches (
            dispatch_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            manifest TEXT NOT NULL,
            result_uri TEXT,
            error TEXT,
            parent_dispatch_id TEXT,
            parent_node_id INTEGER,
            parent_electron_id TEXT,
            created_at TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_dispatches_status ON dispatches(status);

        CREATE TABLE IF NOT EXISTS nodes (
            dispatch_id TEXT NOT NULL,
            node_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            task_group_id INTEGER NOT NULL,
            executor TEXT NOT NULL,
            hooks TEXT NOT NULL,
            function_uri TEXT,
            start_time TEXT,
            end_time TEXT,
            output_uri TEXT,
            stdout_uri TEXT,
            stderr_uri TEXT,
            error TEXT,
            sub_dispatch_id TEXT,
            UNIQUE (dispatch_id, node_id),
            FOREIGN KEY (dispatch_id) REFERENCES dispatches(dispatch_id)
        );

        CREATE TABLE IF NOT EXISTS edges (
            edge_id INTEGER PRIMARY KEY AUTOINCREMENT,
            dispatch_id TEXT NOT NULL,
            source INTEGER NOT NULL,
            target INTEGER NOT NULL,
            edge_name TEXT NOT NULL,
            slot TEXT,
            FOREIGN KEY (dispatch_id, source) REFERENCES nodes(dispatch_id, node_id),
            FOREIGN KEY (dispatch_id, target) REFERENCES nodes(dispatch_id, node_id)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(dispatch_id, source);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(dispatch_id, target);

        CREATE TABLE IF NOT EXISTS jobs (
            job_id INTEGER PRIMARY KEY AUTOINCREMENT,
            dispatch_id TEXT NOT NULL,
            node_id INTEGER NOT NULL,
            job_handle TEXT,
            status TEXT NOT NULL DEFAULT 'NEW_OBJECT',
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            cancel_successful INTEGER NOT NULL DEFAULT 0,
            UNIQUE (dispatch_id, node_id),
            FOREIGN KEY (dispatch_id, node_id) REFERENCES nodes(dispatch_id, node_id)
        );

        CREATE TABLE IF NOT EXISTS assets (
            asset_id INTEGER PRIMARY KEY AUTOINCREMENT,
            dispatch_id TEXT NOT NULL,
            node_id INTEGER,
            object_key TEXT NOT NULL,
            storage_type TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            digest_alg TEXT,
            digest TEXT,
            remote_uri TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            UNIQUE (dispatch_id, object_key),
            FOREIGN KEY (dispatch_id) REFERENCES dispatches(dispatch_id)
        );",
    )?;
    Ok(())
}
