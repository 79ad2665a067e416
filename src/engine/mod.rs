// src/engine/mod.rs

//! Orchestration engine for latticeflow.
//!
//! This module ties together:
//! - the per-dispatch schedulers, driven by node-status events
//! - the runtime event loop, the single consumer of the node-status queue
//! - the [`Dispatcher`] handle used to register, start, cancel and export
//!   dispatches
//! - finalization of finished dispatches (postprocessing included)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::tracker::NodeResult;
use crate::types::{DispatchId, NodeId};

/// Events flowing into the runtime from the dispatcher and the task runner.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatch moved to RUNNING; build its scheduler.
    StartDispatch { dispatch_id: DispatchId },
    /// Status reports for nodes of one dispatch, applied in order.
    NodeUpdate {
        dispatch_id: DispatchId,
        results: Vec<NodeResult>,
    },
    /// Cancel nodes that were not submitted yet. Empty means every node.
    CancelNodes {
        dispatch_id: DispatchId,
        node_ids: Vec<NodeId>,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod dispatcher;
pub mod event_handlers;
pub mod finalize;
pub mod runtime;

pub use core::CoreRuntime;
pub use dispatcher::{
    DispatchReceipt, Dispatcher, DispatcherBuilder, ExportOptions, ExportOutcome, ExportResponse,
    NodeExport, ResultExport,
};
pub use event_handlers::{CoreCommand, CoreStep, FinalOutcome};
pub use runtime::Runtime;
