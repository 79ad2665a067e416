// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod tracker;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, default_config, default_config_path, load_and_validate};
use crate::dag::WorkflowManifest;
use crate::dag::node::{ArgSlot, NodeKind};
use crate::engine::{Dispatcher, ExportOptions, ExportOutcome};
use crate::types::DispatchStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the dispatcher (storage, executors, runtime)
/// - registration or redispatch of the manifest, or a cancel request
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(Path::new(&args.config))?;
    let manifest = args
        .manifest
        .as_deref()
        .map(read_manifest)
        .transpose()?;

    if args.dry_run {
        let manifest = manifest.context("--dry-run needs --manifest")?;
        print_dry_run(&cfg, &manifest)?;
        return Ok(());
    }

    let dispatcher = Dispatcher::builder(cfg).build()?;

    if let Some(dispatch_id) = &args.cancel {
        let message = dispatcher.cancel(dispatch_id, &args.tasks).await?;
        println!("{message}");
        dispatcher.shutdown().await;
        return Ok(());
    }

    let receipt = match &args.redispatch_of {
        Some(previous) => {
            dispatcher.register_redispatch(manifest, previous, args.reuse_previous_results)?
        }
        None => dispatcher.register_dispatch(manifest.context("--manifest is required")?)?,
    };
    let dispatch_id = receipt.dispatch_id;
    info!(%dispatch_id, "dispatch registered");

    // Ctrl-C → cancel the dispatch; waiting below then returns.
    {
        let dispatcher = dispatcher.clone();
        let dispatch_id = dispatch_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!(%dispatch_id, "Ctrl-C received; cancelling dispatch");
            if let Err(err) = dispatcher.cancel(&dispatch_id, &[]).await {
                warn!(%dispatch_id, error = %err, "cancel failed");
            }
        });
    }

    dispatcher.start_dispatch(&dispatch_id).await?;
    let status = dispatcher.wait_for_terminal(&dispatch_id).await?;

    if let ExportOutcome::Ready(response) = dispatcher
        .export_result(&dispatch_id, ExportOptions::default())
        .await?
    {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    dispatcher.shutdown().await;

    if status != DispatchStatus::Completed {
        bail!("dispatch {dispatch_id} finished with status {status}");
    }
    Ok(())
}

/// Load the config file. A missing default file means built-in defaults.
fn load_config(path: &Path) -> Result<ConfigFile> {
    if path == default_config_path() && !path.exists() {
        debug!("no config file found; using defaults");
        return Ok(default_config()?);
    }
    load_and_validate(path).with_context(|| format!("loading config {}", path.display()))
}

fn read_manifest(path: &Path) -> Result<WorkflowManifest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing manifest {}", path.display()))
}

/// Simple dry-run output: print nodes, groups, executors and edges.
fn print_dry_run(cfg: &ConfigFile, manifest: &WorkflowManifest) -> Result<()> {
    let graph = manifest.to_task_graph(&cfg.executors.default)?;

    println!("latticeflow dry-run");
    println!("  workflow = {}", manifest.name);
    println!("  executors.default = {}", cfg.executors.default);
    println!(
        "  executors.workflow_executor = {}",
        manifest
            .metadata
            .workflow_executor
            .as_deref()
            .unwrap_or(&cfg.executors.workflow_executor)
    );
    println!();

    println!("nodes ({}):", graph.len());
    for node in graph.nodes() {
        println!("  - {} [{}]", node.node_id, node.name);
        match &node.kind {
            NodeKind::Parameter { value } => println!("      parameter: {value}"),
            NodeKind::Task { function } => println!("      task: {function}"),
            NodeKind::Sublattice { workflow } => println!("      sublattice: {workflow}"),
        }
        if !node.is_parameter() {
            println!("      executor: {}", node.executor.name);
        }
        if node.task_group_id != node.node_id {
            println!("      task_group: {}", node.task_group_id);
        }
        if !node.hooks.bash.is_empty() {
            println!("      bash: {:?}", node.hooks.bash);
        }
        if !node.hooks.pip.is_empty() {
            println!("      pip: {:?}", node.hooks.pip);
        }
    }

    println!();
    println!("edges ({}):", graph.edges().len());
    for edge in graph.edges() {
        let slot = match &edge.attrs.slot {
            Some(ArgSlot::Positional(i)) => format!("arg {i}"),
            Some(ArgSlot::Keyword(k)) => format!("kwarg {k}"),
            None => "wait_for".to_string(),
        };
        println!("  - {} -> {} ({slot})", edge.source, edge.target);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
