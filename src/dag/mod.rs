// src/dag/mod.rs

//! Task graphs and scheduling.
//!
//! - [`node`] defines nodes, edge attributes and updatable node fields.
//! - [`graph`] holds the in-memory directed acyclic graph of a dispatch.
//! - [`manifest`] is the submitted workflow form and its validation.
//! - [`diff`] finds nodes whose results can be reused on redispatch.
//! - [`scheduler`] contains the per-dispatch state machine that decides
//!   which task groups are ready and when dependents are skipped.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] holds readiness and cascade logic.

pub mod diff;
pub mod graph;
pub mod manifest;
pub mod node;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::TaskGraph;
pub use manifest::WorkflowManifest;
pub use node::{Edge, EdgeAttrs, ExecutorSpec, Node, NodeField, NodeKind};
pub use scheduler::{FirstFailure, Scheduler};
pub use scheduler_step::{ScheduledGroup, SchedulerStep};
