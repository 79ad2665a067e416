// src/logging.rs

//! Logging setup for `latticeflow` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line
//! 2. `LATTICEFLOW_LOG`, either a bare level ("debug") or full filter
//!    directives ("info,latticeflow::exec=trace")
//! 3. `info`
//!
//! Logs go to stderr; stdout carries only the exported result.
//!
//! Work done on behalf of one dispatch runs inside [`dispatch_span`] or
//! [`task_group_span`], so every event it emits carries the dispatch id.

use anyhow::Result;
use tracing::{Span, info_span};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;
use crate::types::NodeId;

pub const LOG_ENV_VAR: &str = "LATTICEFLOW_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    fmt()
        .with_env_filter(env_filter(cli_level, env_value.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(())
}

/// Filter for a CLI level and the raw value of `LATTICEFLOW_LOG`.
/// Unparseable directives fall back to `info`.
pub fn env_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level_name(level));
    }
    let Some(raw) = env_value.map(str::trim).filter(|s| !s.is_empty()) else {
        return EnvFilter::new(DEFAULT_FILTER);
    };
    if let Some(level) = parse_level_str(raw) {
        return EnvFilter::new(level);
    }
    EnvFilter::try_new(raw).unwrap_or_else(|err| {
        eprintln!("ignoring {LOG_ENV_VAR}={raw:?}: {err}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Span for everything the engine does for one dispatch.
pub fn dispatch_span(dispatch_id: &str) -> Span {
    info_span!("dispatch", %dispatch_id)
}

/// Span for one task group of a dispatch, from submission to its results.
pub fn task_group_span(dispatch_id: &str, task_group_id: NodeId) -> Span {
    info_span!("task_group", %dispatch_id, task_group_id)
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

fn parse_level_str(s: &str) -> Option<&'static str> {
    match s.to_lowercase().as_str() {
        "error" => Some("error"),
        "warn" | "warning" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        _ => None,
    }
}
