// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! The core consumes [`RuntimeEvent`]s and produces commands describing what
//! the IO shell should do next. It owns one [`Scheduler`] per running
//! dispatch and talks only to the database; it never awaits, spawns or
//! touches channels, so it can be stepped directly in tests.
//!
//! [`Scheduler`]: crate::dag::Scheduler

use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, Schedulers, handle_cancel, handle_node_update, handle_start,
};
use crate::store::Database;
use crate::types::DispatchId;

#[derive(Debug)]
pub struct CoreRuntime {
    db: Database,
    schedulers: Schedulers,
}

impl CoreRuntime {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            schedulers: Schedulers::new(),
        }
    }

    /// Dispatches that currently have a scheduler.
    pub fn active_dispatches(&self) -> Vec<DispatchId> {
        let mut ids: Vec<DispatchId> = self.schedulers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::StartDispatch { dispatch_id } => {
                handle_start(&self.db, &mut self.schedulers, dispatch_id)
            }
            RuntimeEvent::NodeUpdate {
                dispatch_id,
                results,
            } => handle_node_update(&mut self.schedulers, dispatch_id, results),
            RuntimeEvent::CancelNodes {
                dispatch_id,
                node_ids,
            } => handle_cancel(&mut self.schedulers, dispatch_id, node_ids),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
