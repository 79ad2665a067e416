// src/engine/dispatcher.rs

//! The [`Dispatcher`] handle: registration, start, cancellation and export
//! of dispatches.
//!
//! A dispatcher owns the bounded node-status and job-event queues and the
//! two listener tasks that drain them. It is cheap to clone; every clone
//! talks to the same runtime.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CLIENT_EXECUTOR, ConfigFile, PluginKind};
use crate::context::{AppContext, Settings};
use crate::dag::diff::compare_transport_graphs;
use crate::dag::graph::TaskGraph;
use crate::dag::manifest::WorkflowManifest;
use crate::dag::node::NodeKind;
use crate::dag::state_manager::StateManager;
use crate::engine::RuntimeEvent;
use crate::engine::core::CoreRuntime;
use crate::engine::finalize::RESULT_KEY;
use crate::engine::runtime::Runtime;
use crate::errors::{DispatchError, Result};
use crate::exec::backend::{BoxFuture, JobEvent, JobEventSender};
use crate::exec::job_manager;
use crate::exec::local::LocalExecutor;
use crate::exec::process::ProcessExecutor;
use crate::exec::registry::{
    ExecutorConstructor, ExecutorContext, ExecutorRegistry, FunctionRegistry, WorkflowRegistry,
};
use crate::exec::task_runner;
use crate::store::{AssetManager, Database, DispatchRecord, ParentLink, TransportGraph, records};
use crate::tracker::NodeResult;
use crate::types::{DispatchId, DispatchStatus, NodeId, NodeStatus};

/// Answer to a registration: the assigned id, the stored manifest and the
/// URI of every asset written for the dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReceipt {
    pub dispatch_id: DispatchId,
    pub manifest: WorkflowManifest,
    pub asset_uris: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Block (bounded by `export_wait_secs`) until the dispatch is terminal.
    pub wait: bool,
    /// Only report the status.
    pub status_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeExport {
    pub node_id: NodeId,
    pub name: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_dispatch_id: Option<DispatchId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultExport {
    pub result: Option<Value>,
    pub error: Option<String>,
    pub nodes: Vec<NodeExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResponse {
    pub id: DispatchId,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_export: Option<ResultExport>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Ready(ExportResponse),
    /// Wait mode timed out while the dispatch was still running.
    NotReady { retry_after: Duration },
}

struct Inner {
    ctx: AppContext,
    node_tx: mpsc::Sender<RuntimeEvent>,
    job_tx: JobEventSender,
    watchers: Mutex<HashMap<DispatchId, watch::Sender<DispatchStatus>>>,
    /// Serializes start against cancel so a cancel never races a start.
    lifecycle: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ctx", &self.inner.ctx)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn builder(config: ConfigFile) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.ctx
    }

    pub fn job_events(&self) -> JobEventSender {
        self.inner.job_tx.clone()
    }

    // -----------------------------------------------------------------
    // registration

    /// Persist a new dispatch in NEW_OBJECT. Nothing runs until
    /// [`start_dispatch`](Self::start_dispatch).
    pub fn register_dispatch(&self, manifest: WorkflowManifest) -> Result<DispatchReceipt> {
        self.register(manifest, None, None)
    }

    /// Register a sublattice dispatch linked to the node that spawned it.
    pub fn register_subdispatch(
        &self,
        manifest: WorkflowManifest,
        parent: ParentLink,
    ) -> Result<DispatchReceipt> {
        self.register(manifest, Some(parent), None)
    }

    /// Register a new dispatch derived from `previous_id`, optionally with a
    /// new manifest. With `reuse_previous_results`, nodes the diff proves
    /// unchanged keep their COMPLETED results.
    pub fn register_redispatch(
        &self,
        manifest: Option<WorkflowManifest>,
        previous_id: &str,
        reuse_previous_results: bool,
    ) -> Result<DispatchReceipt> {
        let (previous, old_graph) = {
            let conn = self.context().db.conn();
            (
                records::get_dispatch(&conn, previous_id)?,
                records::load_graph(&conn, previous_id)?,
            )
        };
        let manifest = manifest.unwrap_or(previous.manifest);
        info!(
            previous_dispatch_id = %previous_id,
            reuse_previous_results,
            "registering redispatch"
        );
        self.register(
            manifest,
            None,
            Some(Previous {
                graph: &old_graph,
                reuse: reuse_previous_results,
            }),
        )
    }

    fn validate_executors(&self, manifest: &WorkflowManifest, graph: &TaskGraph) -> Result<()> {
        let ctx = self.context();
        for node in graph.nodes().filter(|n| !n.is_parameter()) {
            if !ctx.executors.contains(&node.executor.name) {
                return Err(DispatchError::Validation(format!(
                    "node {} uses unknown executor '{}'",
                    node.node_id, node.executor.name
                )));
            }
        }

        let workflow_executor = manifest
            .metadata
            .workflow_executor
            .as_deref()
            .unwrap_or(&ctx.settings.workflow_executor);
        if workflow_executor == CLIENT_EXECUTOR {
            return Err(DispatchError::Validation(format!(
                "workflow '{}' cannot use the '{CLIENT_EXECUTOR}' workflow executor",
                manifest.name
            )));
        }
        if !ctx.executors.contains(workflow_executor) {
            return Err(DispatchError::Validation(format!(
                "unknown workflow executor '{workflow_executor}'"
            )));
        }
        Ok(())
    }

    fn register(
        &self,
        manifest: WorkflowManifest,
        parent: Option<ParentLink>,
        previous: Option<Previous<'_>>,
    ) -> Result<DispatchReceipt> {
        let ctx = self.context();
        let mut graph = manifest.to_task_graph(&ctx.settings.default_executor)?;
        self.validate_executors(&manifest, &graph)?;

        let reused = match previous {
            Some(previous) => {
                let candidates = compare_transport_graphs(previous.graph, &graph)?;
                if previous.reuse {
                    reuse_results(previous.graph, &mut graph, candidates)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };

        let dispatch_id = Uuid::new_v4().to_string();
        let mut asset_uris = BTreeMap::new();
        let mut payloads = Vec::with_capacity(graph.len());
        let node_ids: Vec<NodeId> = graph.node_ids().collect();
        for node_id in node_ids {
            let Some(node) = graph.node_mut(node_id) else {
                continue;
            };
            let (file, payload) = match &node.kind {
                NodeKind::Parameter { value } => ("value.json", value.clone()),
                NodeKind::Task { function } => ("function.json", json!({ "function": function })),
                NodeKind::Sublattice { workflow } => {
                    ("workflow.json", json!({ "workflow": workflow }))
                }
            };
            let key = AssetManager::node_key(node_id, file);
            let uri = ctx.assets.upload_uri(&dispatch_id, &key);
            node.function_uri = Some(uri.clone());
            asset_uris.insert(key.clone(), uri);
            payloads.push((node_id, key, payload));
        }
        asset_uris.insert(
            RESULT_KEY.to_string(),
            ctx.assets.upload_uri(&dispatch_id, RESULT_KEY),
        );

        let mut record = DispatchRecord::new(dispatch_id.clone(), manifest);
        record.parent = parent;
        records::insert_dispatch_graph(&mut ctx.db.conn(), &record, &graph)?;
        for (node_id, key, payload) in &payloads {
            ctx.assets
                .store_json(&dispatch_id, Some(*node_id), key, payload)?;
        }

        lock(&self.inner.watchers).insert(
            dispatch_id.clone(),
            watch::channel(DispatchStatus::NewObject).0,
        );
        info!(
            %dispatch_id,
            workflow = %record.name,
            nodes = graph.len(),
            reused = reused.len(),
            parent = ?record.parent.as_ref().map(|p| &p.electron_id),
            "dispatch registered"
        );

        Ok(DispatchReceipt {
            dispatch_id,
            manifest: record.manifest,
            asset_uris,
        })
    }

    // -----------------------------------------------------------------
    // lifecycle

    /// Move a registered dispatch to RUNNING and hand it to the runtime.
    /// Returns once the dispatch is accepted; starting twice is a no-op.
    pub async fn start_dispatch(&self, dispatch_id: &str) -> Result<()> {
        let started = {
            let _guard = self.inner.lifecycle.lock().await;
            let conn = self.context().db.conn();
            let status = records::get_dispatch_status(&conn, dispatch_id)?;
            if status != DispatchStatus::NewObject {
                debug!(%dispatch_id, %status, "dispatch already started; ignoring start");
                false
            } else {
                records::transition_dispatch(
                    &conn,
                    dispatch_id,
                    DispatchStatus::NewObject,
                    DispatchStatus::Running,
                )?
            }
        };
        if !started {
            return Ok(());
        }

        self.notify(dispatch_id);
        info!(%dispatch_id, "dispatch started");
        self.send_event(RuntimeEvent::StartDispatch {
            dispatch_id: dispatch_id.to_string(),
        })
        .await
    }

    /// Cancel a whole dispatch (`node_ids` empty) or specific nodes, and
    /// return a confirmation message. Child sublattice dispatches are
    /// cancelled recursively.
    pub async fn cancel(&self, dispatch_id: &str, node_ids: &[NodeId]) -> Result<String> {
        self.cancel_boxed(dispatch_id, node_ids).await
    }

    fn cancel_boxed<'a>(
        &'a self,
        dispatch_id: &'a str,
        node_ids: &'a [NodeId],
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let ctx = self.context();
            let (status, targets) = {
                let _guard = self.inner.lifecycle.lock().await;
                let (status, targets) = {
                    let conn = ctx.db.conn();
                    let status = records::get_dispatch_status(&conn, dispatch_id)?;
                    let targets = if node_ids.is_empty() {
                        records::node_ids(&conn, dispatch_id)?
                    } else {
                        for id in node_ids {
                            if !records::node_exists(&conn, dispatch_id, *id)? {
                                return Err(DispatchError::NodeNotFound {
                                    dispatch_id: dispatch_id.to_string(),
                                    node_id: *id,
                                });
                            }
                        }
                        node_ids.to_vec()
                    };
                    if status == DispatchStatus::Running {
                        job_manager::set_cancel_requested(&conn, dispatch_id, &targets)?;
                    }
                    (status, targets)
                };

                if status == DispatchStatus::NewObject {
                    let mut graph = TransportGraph::materialized(ctx.db.clone(), dispatch_id)?;
                    let cancelled = StateManager::new(&mut graph).cancel_nodes(&targets)?;
                    if node_ids.is_empty() {
                        records::transition_dispatch(
                            &ctx.db.conn(),
                            dispatch_id,
                            DispatchStatus::NewObject,
                            DispatchStatus::Cancelled,
                        )?;
                    }
                    info!(%dispatch_id, cancelled = ?cancelled, "cancelled dispatch before start");
                }
                (status, targets)
            };

            if status == DispatchStatus::NewObject {
                self.notify(dispatch_id);
            } else if status == DispatchStatus::Running {
                self.send_event(RuntimeEvent::CancelNodes {
                    dispatch_id: dispatch_id.to_string(),
                    node_ids: node_ids.to_vec(),
                })
                .await?;

                let nodes = TransportGraph::bare(ctx.db.clone(), dispatch_id).get_nodes(&targets)?;
                let submitted: Vec<NodeId> = nodes
                    .iter()
                    .filter(|n| {
                        matches!(n.status, NodeStatus::Pending | NodeStatus::Running)
                            && !n.is_sublattice()
                    })
                    .map(|n| n.node_id)
                    .collect();
                task_runner::cancel_tasks(ctx, dispatch_id, &submitted).await?;

                for child in nodes.iter().filter_map(|n| n.sub_dispatch_id.as_deref()) {
                    if let Err(err) = self.cancel_boxed(child, &[]).await {
                        warn!(%dispatch_id, sub_dispatch_id = %child, error = %err, "could not cancel sublattice dispatch");
                    }
                }
                info!(%dispatch_id, nodes = ?targets, "cancellation requested");
            } else {
                debug!(%dispatch_id, %status, "cancel on finished dispatch is a no-op");
            }

            Ok(if node_ids.is_empty() {
                format!("Dispatch {dispatch_id} cancelled.")
            } else {
                format!("Cancelled tasks {node_ids:?} in dispatch {dispatch_id}.")
            })
        })
    }

    /// Queue node results for the scheduler of `dispatch_id`.
    pub async fn report(&self, dispatch_id: &str, results: Vec<NodeResult>) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        self.send_event(RuntimeEvent::NodeUpdate {
            dispatch_id: dispatch_id.to_string(),
            results,
        })
        .await
    }

    async fn send_event(&self, event: RuntimeEvent) -> Result<()> {
        self.inner
            .node_tx
            .send(event)
            .await
            .map_err(|_| DispatchError::ChannelClosed("node events"))
    }

    // -----------------------------------------------------------------
    // status

    pub fn get_status(&self, dispatch_id: &str) -> Result<DispatchStatus> {
        records::get_dispatch_status(&self.context().db.conn(), dispatch_id)
    }

    /// Publish the stored status of `dispatch_id` to its waiters. Must not be
    /// called while holding the database lock. A terminal status is the last
    /// one published, so the watcher is dropped after sending it.
    pub(crate) fn notify(&self, dispatch_id: &str) {
        let mut watchers = lock(&self.inner.watchers);
        if !watchers.contains_key(dispatch_id) {
            return;
        }
        match records::get_dispatch_status(&self.context().db.conn(), dispatch_id) {
            Ok(status) if status.is_terminal() => {
                if let Some(tx) = watchers.remove(dispatch_id) {
                    tx.send_replace(status);
                }
                debug!(%dispatch_id, %status, "dispatch settled; watcher dropped");
            }
            Ok(status) => {
                if let Some(tx) = watchers.get(dispatch_id) {
                    tx.send_replace(status);
                }
            }
            Err(err) => warn!(%dispatch_id, error = %err, "could not read dispatch status"),
        }
    }

    /// Number of dispatches that still have a status watcher.
    pub fn watched_dispatches(&self) -> usize {
        lock(&self.inner.watchers).len()
    }

    fn subscribe(&self, dispatch_id: &str) -> Result<watch::Receiver<DispatchStatus>> {
        let mut watchers = lock(&self.inner.watchers);
        let current = records::get_dispatch_status(&self.context().db.conn(), dispatch_id)?;
        if current.is_terminal() {
            // Nothing more will be published; the receiver still sees `current`.
            return Ok(watch::channel(current).1);
        }
        let tx = watchers
            .entry(dispatch_id.to_string())
            .or_insert_with(|| watch::channel(current).0);
        tx.send_if_modified(|status| {
            let stale = *status != current;
            *status = current;
            stale
        });
        Ok(tx.subscribe())
    }

    /// Wait until the dispatch reaches a terminal status.
    pub async fn wait_for_terminal(&self, dispatch_id: &str) -> Result<DispatchStatus> {
        let mut rx = self.subscribe(dispatch_id)?;
        let status = *rx
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| DispatchError::ChannelClosed("dispatch status"))?;
        Ok(status)
    }

    /// Status and whatever results are available. In wait mode the call is
    /// bounded by `export_wait_secs`.
    pub async fn export_result(&self, dispatch_id: &str, options: ExportOptions) -> Result<ExportOutcome> {
        let settings = &self.context().settings;
        if options.wait {
            match tokio::time::timeout(settings.export_wait, self.wait_for_terminal(dispatch_id)).await {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    debug!(%dispatch_id, "export wait timed out");
                    return Ok(ExportOutcome::NotReady {
                        retry_after: settings.retry_after,
                    });
                }
            }
        }

        let record = records::get_dispatch(&self.context().db.conn(), dispatch_id)?;
        let result_export = if options.status_only {
            None
        } else {
            Some(self.result_export(&record)?)
        };
        Ok(ExportOutcome::Ready(ExportResponse {
            id: record.dispatch_id,
            status: record.status,
            result_export,
        }))
    }

    fn result_export(&self, record: &DispatchRecord) -> Result<ResultExport> {
        let assets = &self.context().assets;
        let load = |uri: &Option<String>| {
            uri.as_deref().and_then(|uri| match assets.load_json(uri) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(%uri, error = %err, "could not load asset for export");
                    None
                }
            })
        };

        let graph = records::load_graph(&self.context().db.conn(), &record.dispatch_id)?;
        let nodes = graph
            .nodes()
            .map(|node| NodeExport {
                node_id: node.node_id,
                name: node.name.clone(),
                status: node.status,
                output: load(&node.output_uri),
                error: node.error.clone(),
                stdout_uri: node.stdout_uri.clone(),
                stderr_uri: node.stderr_uri.clone(),
                sub_dispatch_id: node.sub_dispatch_id.clone(),
            })
            .collect();

        Ok(ResultExport {
            result: load(&record.result_uri),
            error: record.error.clone(),
            nodes,
        })
    }

    // -----------------------------------------------------------------
    // shutdown

    /// Cancel every NEW_OBJECT or RUNNING dispatch, wait (bounded) for them
    /// to settle, then stop both listener tasks.
    pub async fn shutdown(&self) {
        let pending = records::dispatch_ids_with_status(
            &self.context().db.conn(),
            &[DispatchStatus::NewObject, DispatchStatus::Running],
        );
        match pending {
            Ok(ids) => {
                for id in &ids {
                    if let Err(err) = self.cancel(id, &[]).await {
                        warn!(dispatch_id = %id, error = %err, "could not cancel dispatch on shutdown");
                    }
                }
                let wait = self.context().settings.export_wait;
                for id in &ids {
                    if tokio::time::timeout(wait, self.wait_for_terminal(id)).await.is_err() {
                        warn!(dispatch_id = %id, "dispatch still running at shutdown");
                    }
                }
            }
            Err(err) => error!(error = %err, "could not list active dispatches"),
        }

        if self.send_event(RuntimeEvent::ShutdownRequested).await.is_err() {
            debug!("runtime already stopped");
        }
        self.inner.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "listener task ended abnormally");
            }
        }
        info!("dispatcher shut down");
    }
}

struct Previous<'a> {
    graph: &'a TaskGraph,
    reuse: bool,
}

/// Copy results of reusable nodes that completed in the previous dispatch.
fn reuse_results(
    old: &TaskGraph,
    new: &mut TaskGraph,
    candidates: impl IntoIterator<Item = NodeId>,
) -> Vec<NodeId> {
    let mut reused = Vec::new();
    for node_id in candidates {
        let Some(prev) = old.node(node_id).filter(|n| n.status == NodeStatus::Completed) else {
            continue;
        };
        let Some(node) = new.node_mut(node_id) else {
            continue;
        };
        node.status = NodeStatus::Completed;
        node.output_uri = prev.output_uri.clone();
        node.stdout_uri = prev.stdout_uri.clone();
        node.stderr_uri = prev.stderr_uri.clone();
        node.start_time = prev.start_time;
        node.end_time = prev.end_time;
        node.sub_dispatch_id = prev.sub_dispatch_id.clone();
        reused.push(node_id);
    }
    debug!(reused = ?reused, "reusing previous results");
    reused
}

/// Assembles a [`Dispatcher`] from configuration plus programmatic
/// registrations.
pub struct DispatcherBuilder {
    config: ConfigFile,
    functions: FunctionRegistry,
    workflows: WorkflowRegistry,
    plugins: Vec<(String, ExecutorConstructor, Value)>,
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("config", &self.config)
            .field("functions", &self.functions)
            .field("workflows", &self.workflows)
            .finish_non_exhaustive()
    }
}

impl DispatcherBuilder {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            functions: FunctionRegistry::default(),
            workflows: WorkflowRegistry::default(),
            plugins: Vec::new(),
        }
    }

    pub fn register_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<Value>, serde_json::Map<String, Value>) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.functions.register(name, function);
        self
    }

    pub fn register_workflow<F>(mut self, name: impl Into<String>, builder: F) -> Self
    where
        F: Fn(
                Vec<Value>,
                serde_json::Map<String, Value>,
            ) -> std::result::Result<WorkflowManifest, String>
            + Send
            + Sync
            + 'static,
    {
        self.workflows.register(name, builder);
        self
    }

    /// Register an executor plugin on top of the configured ones.
    pub fn register_executor(
        mut self,
        name: impl Into<String>,
        constructor: ExecutorConstructor,
        defaults: Value,
    ) -> Self {
        self.plugins.push((name.into(), constructor, defaults));
        self
    }

    /// Open storage, build the registries and spawn the listener tasks.
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Dispatcher> {
        let cfg = self.config;
        let db = match &cfg.storage.db_path {
            Some(path) => Database::open(path)?,
            None => Database::in_memory()?,
        };
        let asset_dir = cfg
            .storage
            .asset_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("latticeflow-assets"));
        let assets = AssetManager::new(asset_dir, db.clone())?;

        let (node_tx, node_rx) = mpsc::channel(cfg.server.node_event_queue_capacity);
        let (job_tx, job_rx) = mpsc::channel::<JobEvent>(cfg.server.job_event_queue_capacity);

        let mut registry = ExecutorRegistry::new(ExecutorContext {
            assets: assets.clone(),
            functions: self.functions,
            job_events: job_tx.clone(),
        });
        for (name, plugin) in &cfg.executors.plugins {
            let constructor = match plugin.kind {
                PluginKind::Local => LocalExecutor::constructor(),
                PluginKind::Process => ProcessExecutor::constructor(),
            };
            registry.register(name.clone(), constructor, plugin.defaults());
        }
        for (name, constructor, defaults) in self.plugins {
            registry.register(name, constructor, defaults);
        }

        let ctx = AppContext {
            db: db.clone(),
            assets,
            executors: Arc::new(registry),
            workflows: Arc::new(self.workflows),
            settings: Arc::new(Settings::from(&cfg)),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher {
            inner: Arc::new(Inner {
                ctx,
                node_tx,
                job_tx,
                watchers: Mutex::new(HashMap::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let runtime = Runtime::new(CoreRuntime::new(db), node_rx, dispatcher.clone());
        let runtime_task = tokio::spawn(async move {
            if let Err(err) = runtime.run().await {
                error!(error = %err, "runtime stopped with error");
            }
        });
        let listener_task = tokio::spawn(task_runner::listen_for_job_events(
            dispatcher.clone(),
            job_rx,
            shutdown_rx,
        ));
        lock(&dispatcher.inner.tasks).extend([runtime_task, listener_task]);

        info!(
            executors = ?dispatcher.context().executors.names().collect::<Vec<_>>(),
            "dispatcher ready"
        );
        Ok(dispatcher)
    }
}
