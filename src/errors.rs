// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::NodeId;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Malformed graph, unknown executor, forbidden workflow executor.
    /// Surfaced synchronously at registration time and never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Node {node_id} already exists in dispatch {dispatch_id}")]
    DuplicateNode { dispatch_id: String, node_id: NodeId },

    #[error("Node {node_id} not found in dispatch {dispatch_id}")]
    NodeNotFound { dispatch_id: String, node_id: NodeId },

    #[error("Dispatch not found: {0}")]
    DispatchNotFound(String),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    /// The synthetic diff root collides with a real node id.
    #[error("Graph diff integrity error: {0}")]
    DiffIntegrity(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
