// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::NodeId;

/// Command-line arguments for `latticeflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "latticeflow",
    version,
    about = "Dispatch a workflow manifest, run it to completion and print the result.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Latticeflow.toml` in the current working directory. When
    /// the default file does not exist, built-in defaults are used.
    #[arg(long, value_name = "PATH", default_value = "Latticeflow.toml")]
    pub config: String,

    /// Workflow manifest (JSON) to dispatch.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Redispatch an earlier dispatch, optionally with `--manifest` as the
    /// new workflow. Needs a persistent `[storage].db_path`.
    #[arg(long, value_name = "ID")]
    pub redispatch_of: Option<String>,

    /// With `--redispatch-of`, keep results of unchanged nodes.
    #[arg(long, requires = "redispatch_of")]
    pub reuse_previous_results: bool,

    /// Cancel a dispatch instead of running one.
    #[arg(long, value_name = "ID", conflicts_with_all = ["manifest", "redispatch_of"])]
    pub cancel: Option<String>,

    /// With `--cancel`, only cancel these node ids. Repeatable.
    #[arg(long = "task", value_name = "NODE_ID", requires = "cancel")]
    pub tasks: Vec<NodeId>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LATTICEFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the manifest, print the task graph, but don't
    /// execute anything.
    #[arg(long, requires = "manifest")]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
