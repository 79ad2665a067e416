// src/store/mod.rs

//! Persistence for dispatches, task graphs, job metadata and assets.
//!
//! - [`schema`] creates the SQLite tables.
//! - [`records`] holds row-level reads and writes.
//! - [`transport_graph`] is the graph-store API used by the scheduler and
//!   the task runner, in materialized or bare mode.
//! - [`assets`] stores large values out of band and hands out URIs.

pub mod assets;
pub mod records;
pub mod schema;
pub mod transport_graph;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::errors::Result;

pub use assets::{AssetManager, AssetRecord};
pub use records::{DispatchRecord, JobRecord, ParentLink};
pub use transport_graph::TransportGraph;

/// Shared SQLite connection.
///
/// Every statement runs while holding the mutex, so a multi-column update
/// of one node is never observed half-written.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used when no path is configured.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection. A poisoned lock is recovered: SQLite keeps its
    /// own consistency and the guard holds no other state.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
