// src/exec/task_runner.rs

//! Runs scheduled task groups against their executor and turns executor
//! answers into node results.
//!
//! A task group goes through a cancel check, input resolution, submission,
//! a second cancel check and a poll. Results arrive right after the poll or
//! later through the job-event queue; either way they are turned into
//! [`NodeResult`]s by [`collect_task_group_results`] and reported to the
//! engine. Parameter and sublattice nodes always form their own group and
//! take dedicated paths.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::CLIENT_EXECUTOR;
use crate::context::AppContext;
use crate::dag::ScheduledGroup;
use crate::dag::manifest::{DepsSpec, LatticeMetadata, WorkflowManifest};
use crate::dag::node::{ArgSlot, Node, NodeKind};
use crate::engine::Dispatcher;
use crate::errors::{DispatchError, Result};
use crate::exec::backend::{
    Executor, InputRef, JobEvent, JobPoll, JobStatus, ResourceMap, TaskGroupMetadata, TaskResult,
    TaskSpec,
};
use crate::exec::hooks::gather_deps;
use crate::exec::job_manager;
use crate::exec::registry::ExecutorRegistry;
use crate::logging::task_group_span;
use crate::store::{AssetManager, ParentLink, TransportGraph, records};
use crate::tracker::NodeResult;
use crate::types::{DispatchId, DispatchStatus, NodeId, NodeStatus};

/// Run one scheduled group. Any error before the executor took over marks
/// every member FAILED with that error.
pub async fn run_task_group(dispatcher: Dispatcher, dispatch_id: DispatchId, group: ScheduledGroup) {
    if let Err(err) = run_task_group_inner(&dispatcher, &dispatch_id, &group).await {
        error!(
            %dispatch_id,
            task_group_id = group.task_group_id,
            error = %err,
            "task group failed"
        );
        let results = group
            .node_ids
            .iter()
            .map(|id| NodeResult::failed(*id, err.to_string()))
            .collect();
        if let Err(report_err) = dispatcher.report(&dispatch_id, results).await {
            warn!(%dispatch_id, error = %report_err, "could not report task group failure");
        }
    }
}

async fn run_task_group_inner(
    dispatcher: &Dispatcher,
    dispatch_id: &str,
    group: &ScheduledGroup,
) -> Result<()> {
    let ctx = dispatcher.context();
    job_manager::ensure_jobs(&ctx.db.conn(), dispatch_id, &group.node_ids)?;
    let graph = TransportGraph::bare(ctx.db.clone(), dispatch_id);
    let nodes = graph.get_nodes(&group.node_ids)?;

    if let [node] = nodes.as_slice() {
        match &node.kind {
            NodeKind::Parameter { value } => {
                return run_parameter(dispatcher, dispatch_id, node, value).await;
            }
            NodeKind::Sublattice { workflow } => {
                return run_sublattice(dispatcher, dispatch_id, &graph, node, workflow).await;
            }
            NodeKind::Task { .. } => {}
        }
    }

    if cancel_requested(ctx, dispatch_id, &group.node_ids)? {
        info!(
            %dispatch_id,
            task_group_id = group.task_group_id,
            "task group cancelled before submission"
        );
        return dispatcher
            .report(dispatch_id, cancelled(&group.node_ids))
            .await;
    }

    let first = nodes.first().ok_or_else(|| {
        DispatchError::Validation(format!("task group {} is empty", group.task_group_id))
    })?;
    let executor = ctx.executors.get(&first.executor)?;

    let members: BTreeSet<NodeId> = group.node_ids.iter().copied().collect();
    let mut specs = Vec::with_capacity(nodes.len());
    let mut resources = ResourceMap::default();
    for node in &nodes {
        let spec = build_task_spec(&graph, node, &members)?;
        if let Some(uri) = &spec.function_uri {
            resources.functions.insert(node.node_id, uri.clone());
        }
        for input in spec.args.iter().chain(spec.kwargs.values()) {
            if let InputRef::Asset { uri } = input {
                resources.inputs.insert(uri.clone());
            }
        }
        specs.push(spec);
    }

    let meta = TaskGroupMetadata {
        dispatch_id: dispatch_id.to_string(),
        task_group_id: group.task_group_id,
        node_ids: group.node_ids.clone(),
    };

    dispatcher
        .report(
            dispatch_id,
            group.node_ids.iter().map(|id| NodeResult::running(*id)).collect(),
        )
        .await?;

    let job_handle = executor.send(specs, resources, &meta).await?;
    {
        let conn = ctx.db.conn();
        for id in &group.node_ids {
            job_manager::set_job_handle(&conn, dispatch_id, *id, &job_handle)?;
            job_manager::set_job_status(&conn, dispatch_id, *id, NodeStatus::Running.as_str())?;
        }
    }
    debug!(
        %dispatch_id,
        task_group_id = group.task_group_id,
        executor = %executor.name(),
        job = %job_handle,
        "task group submitted"
    );

    if cancel_requested(ctx, dispatch_id, &group.node_ids)? {
        let confirmed = cancel_task(executor.as_ref(), &job_handle).await;
        {
            let conn = ctx.db.conn();
            for id in &group.node_ids {
                job_manager::set_cancel_result(&conn, dispatch_id, *id, confirmed)?;
            }
        }
        info!(
            %dispatch_id,
            task_group_id = group.task_group_id,
            confirmed,
            "task group cancelled after submission"
        );
        return dispatcher
            .report(dispatch_id, cancelled(&group.node_ids))
            .await;
    }

    let status = match executor.poll(&meta, &job_handle).await? {
        JobPoll::Ready => JobStatus::Ready,
        JobPoll::Failed(reason) => JobStatus::Failed(reason),
        JobPoll::Deferred => {
            debug!(%dispatch_id, job = %job_handle, "waiting for job event");
            return Ok(());
        }
    };
    dispatcher
        .job_events()
        .send(JobEvent {
            meta,
            job_handle,
            status,
        })
        .await
        .map_err(|_| DispatchError::ChannelClosed("job events"))
}

fn cancelled(node_ids: &[NodeId]) -> Vec<NodeResult> {
    node_ids.iter().map(|id| NodeResult::cancelled(*id)).collect()
}

fn cancel_requested(ctx: &AppContext, dispatch_id: &str, node_ids: &[NodeId]) -> Result<bool> {
    job_manager::any_cancel_requested(&ctx.db.conn(), dispatch_id, node_ids)
}

/// Output URI of a completed node.
fn completed_output(graph: &TransportGraph, node_id: NodeId) -> Result<String> {
    let node = graph.get_node(node_id)?;
    match (node.status, node.output_uri) {
        (NodeStatus::Completed, Some(uri)) => Ok(uri),
        (status, _) => Err(DispatchError::Validation(format!(
            "input node {node_id} has no output (status {status})"
        ))),
    }
}

/// Resolve the call of one task. Inputs produced inside the group are passed
/// as node references; everything else must already be stored.
pub fn build_task_spec(
    graph: &TransportGraph,
    node: &Node,
    members: &BTreeSet<NodeId>,
) -> Result<TaskSpec> {
    let NodeKind::Task { function } = &node.kind else {
        return Err(DispatchError::Validation(format!(
            "node {} is not a task and cannot share a task group",
            node.node_id
        )));
    };

    let mut positional: Vec<(usize, InputRef)> = Vec::new();
    let mut kwargs = BTreeMap::new();
    for edge in graph.get_incoming_edges(node.node_id)? {
        // wait_for edges only order execution
        let Some(slot) = &edge.attrs.slot else {
            continue;
        };
        let input = if members.contains(&edge.source) {
            InputRef::Node {
                node_id: edge.source,
            }
        } else {
            InputRef::Asset {
                uri: completed_output(graph, edge.source)?,
            }
        };
        match slot {
            ArgSlot::Positional(index) => positional.push((*index, input)),
            ArgSlot::Keyword(name) => {
                kwargs.insert(name.clone(), input);
            }
        }
    }
    positional.sort_by_key(|(index, _)| *index);

    let (before, after) = gather_deps(node);
    Ok(TaskSpec {
        node_id: node.node_id,
        name: node.name.clone(),
        function: function.clone(),
        function_uri: node.function_uri.clone(),
        args: positional.into_iter().map(|(_, input)| input).collect(),
        kwargs,
        before,
        after,
    })
}

/// Load the argument values of `node_id` from its completed parents.
fn resolve_values(
    assets: &AssetManager,
    graph: &TransportGraph,
    node_id: NodeId,
) -> Result<(Vec<Value>, Map<String, Value>)> {
    let mut positional: Vec<(usize, Value)> = Vec::new();
    let mut kwargs = Map::new();
    for edge in graph.get_incoming_edges(node_id)? {
        let Some(slot) = &edge.attrs.slot else {
            continue;
        };
        let value = assets.load_json(&completed_output(graph, edge.source)?)?;
        match slot {
            ArgSlot::Positional(index) => positional.push((*index, value)),
            ArgSlot::Keyword(name) => {
                kwargs.insert(name.clone(), value);
            }
        }
    }
    positional.sort_by_key(|(index, _)| *index);
    Ok((positional.into_iter().map(|(_, v)| v).collect(), kwargs))
}

async fn run_parameter(
    dispatcher: &Dispatcher,
    dispatch_id: &str,
    node: &Node,
    value: &Value,
) -> Result<()> {
    let ctx = dispatcher.context();
    if cancel_requested(ctx, dispatch_id, &[node.node_id])? {
        return dispatcher
            .report(dispatch_id, cancelled(&[node.node_id]))
            .await;
    }

    // The value was stored at registration; fall back to storing it now.
    let uri = match &node.function_uri {
        Some(uri) => uri.clone(),
        None => {
            let key = AssetManager::node_key(node.node_id, "value.json");
            ctx.assets
                .store_json(dispatch_id, Some(node.node_id), &key, value)?
                .uri
        }
    };
    dispatcher
        .report(dispatch_id, vec![NodeResult::completed(node.node_id, uri)])
        .await
}

/// Metadata a sublattice inherits from the node that spawned it.
fn parent_metadata(ctx: &AppContext, dispatch_id: &str, node: &Node) -> Result<LatticeMetadata> {
    let workflow_executor = records::get_dispatch(&ctx.db.conn(), dispatch_id)?
        .manifest
        .metadata
        .workflow_executor;
    let hooks = &node.hooks;
    Ok(LatticeMetadata {
        executor: Some(node.executor.clone()),
        workflow_executor: Some(
            workflow_executor.unwrap_or_else(|| ctx.settings.workflow_executor.clone()),
        ),
        deps: DepsSpec {
            bash: (!hooks.bash.is_empty()).then(|| hooks.bash.clone()),
            pip: (!hooks.pip.is_empty()).then(|| hooks.pip.clone()),
        },
        call_before: (!hooks.call_before.is_empty()).then(|| hooks.call_before.clone()),
        call_after: (!hooks.call_after.is_empty()).then(|| hooks.call_after.clone()),
    })
}

/// Apply inherited metadata to a freshly built sublattice and check that
/// its workflow executor can be served.
pub fn build_sublattice_manifest(
    mut child: WorkflowManifest,
    parent: &LatticeMetadata,
    executors: &ExecutorRegistry,
) -> Result<WorkflowManifest> {
    child.inherit_metadata(parent);
    let workflow_executor = child.metadata.workflow_executor.as_deref().ok_or_else(|| {
        DispatchError::Validation(format!(
            "sublattice '{}' has no workflow executor",
            child.name
        ))
    })?;
    if workflow_executor == CLIENT_EXECUTOR {
        return Err(DispatchError::Validation(format!(
            "sublattice '{}' cannot be built by the '{CLIENT_EXECUTOR}' workflow executor",
            child.name
        )));
    }
    if !executors.contains(workflow_executor) {
        return Err(DispatchError::Validation(format!(
            "unknown workflow executor '{workflow_executor}'"
        )));
    }
    Ok(child)
}

async fn run_sublattice(
    dispatcher: &Dispatcher,
    dispatch_id: &str,
    graph: &TransportGraph,
    node: &Node,
    workflow: &str,
) -> Result<()> {
    let ctx = dispatcher.context();
    let node_id = node.node_id;
    if cancel_requested(ctx, dispatch_id, &[node_id])? {
        return dispatcher.report(dispatch_id, cancelled(&[node_id])).await;
    }

    let (args, kwargs) = resolve_values(&ctx.assets, graph, node_id)?;
    let parent_meta = parent_metadata(ctx, dispatch_id, node)?;
    let child = ctx.workflows.build(workflow, args, kwargs)?;
    let manifest = build_sublattice_manifest(child, &parent_meta, &ctx.executors)?;

    let parent = ParentLink {
        dispatch_id: dispatch_id.to_string(),
        node_id,
        electron_id: format!("{dispatch_id}:{node_id}"),
    };
    let sub_id = dispatcher.register_subdispatch(manifest, parent)?.dispatch_id;
    info!(%dispatch_id, node_id, sub_dispatch_id = %sub_id, "sublattice dispatch registered");

    dispatcher
        .report(
            dispatch_id,
            vec![NodeResult::running(node_id).with_sub_dispatch(sub_id.clone())],
        )
        .await?;

    if cancel_requested(ctx, dispatch_id, &[node_id])? {
        dispatcher.cancel(&sub_id, &[]).await?;
        return dispatcher.report(dispatch_id, cancelled(&[node_id])).await;
    }
    dispatcher.start_dispatch(&sub_id).await?;
    // A cancel may have raced with the sub-dispatch id becoming visible.
    if cancel_requested(ctx, dispatch_id, &[node_id])? {
        dispatcher.cancel(&sub_id, &[]).await?;
    }

    let status = dispatcher.wait_for_terminal(&sub_id).await?;
    let record = records::get_dispatch(&ctx.db.conn(), &sub_id)?;
    let result = match (status, record.result_uri) {
        (DispatchStatus::Completed, Some(uri)) => NodeResult::completed(node_id, uri),
        (DispatchStatus::Cancelled, _) => NodeResult::cancelled(node_id),
        _ => NodeResult::failed(
            node_id,
            record
                .error
                .unwrap_or_else(|| format!("sublattice dispatch {sub_id} failed")),
        ),
    };
    info!(%dispatch_id, node_id, sub_dispatch_id = %sub_id, %status, "sublattice dispatch finished");
    dispatcher
        .report(dispatch_id, vec![result.with_sub_dispatch(sub_id)])
        .await
}

/// Abort one job. Executor errors count as an unconfirmed cancel.
pub async fn cancel_task(executor: &dyn Executor, job_handle: &str) -> bool {
    match executor.cancel(job_handle).await {
        Ok(confirmed) => confirmed,
        Err(err) => {
            warn!(executor = %executor.name(), job = %job_handle, error = %err, "cancel failed");
            false
        }
    }
}

/// Abort the jobs running `node_ids`, once per distinct job handle, and
/// record whether each abort was confirmed. Nodes without a job are skipped.
pub async fn cancel_tasks(ctx: &AppContext, dispatch_id: &str, node_ids: &[NodeId]) -> Result<()> {
    let jobs = job_manager::get_jobs_metadata(&ctx.db.conn(), dispatch_id, node_ids)?;
    let mut by_handle: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for job in jobs {
        if let Some(handle) = job.job_handle {
            by_handle.entry(handle).or_default().push(job.node_id);
        }
    }

    let graph = TransportGraph::bare(ctx.db.clone(), dispatch_id);
    for (handle, ids) in by_handle {
        let Some(&first) = ids.first() else {
            continue;
        };
        let executor = ctx.executors.get(&graph.get_node(first)?.executor)?;
        let confirmed = cancel_task(executor.as_ref(), &handle).await;
        let conn = ctx.db.conn();
        for id in &ids {
            job_manager::set_cancel_result(&conn, dispatch_id, *id, confirmed)?;
        }
        info!(%dispatch_id, job = %handle, nodes = ?ids, confirmed, "requested job cancellation");
    }
    Ok(())
}

/// Turn a settled job into node results and report them.
pub async fn collect_task_group_results(dispatcher: &Dispatcher, event: JobEvent) {
    let dispatch_id = event.meta.dispatch_id.clone();
    let results = match gather_results(dispatcher.context(), &event).await {
        Ok(results) => results,
        Err(err) => {
            warn!(%dispatch_id, job = %event.job_handle, error = %err, "could not collect job results");
            event
                .meta
                .node_ids
                .iter()
                .map(|id| NodeResult::failed(*id, err.to_string()))
                .collect()
        }
    };
    if let Err(err) = dispatcher.report(&dispatch_id, results).await {
        warn!(%dispatch_id, error = %err, "could not report job results");
    }
}

async fn gather_results(ctx: &AppContext, event: &JobEvent) -> Result<Vec<NodeResult>> {
    let meta = &event.meta;
    let task_results: Vec<TaskResult> = match &event.status {
        JobStatus::Ready => {
            let first = meta.node_ids.first().copied().ok_or_else(|| {
                DispatchError::Validation(format!("task group {} is empty", meta.task_group_id))
            })?;
            let node = TransportGraph::bare(ctx.db.clone(), meta.dispatch_id.as_str()).get_node(first)?;
            let executor = ctx.executors.get(&node.executor)?;
            executor.receive(meta, &event.job_handle).await?
        }
        JobStatus::Failed(reason) => meta
            .node_ids
            .iter()
            .map(|id| TaskResult {
                node_id: *id,
                status: NodeStatus::Failed,
                output_uri: None,
                stdout_uri: None,
                stderr_uri: None,
                error: Some(reason.clone()),
            })
            .collect(),
    };

    let conn = ctx.db.conn();
    let cancel_requested: BTreeSet<NodeId> =
        job_manager::get_jobs_metadata(&conn, &meta.dispatch_id, &meta.node_ids)?
            .into_iter()
            .filter(|job| job.cancel_requested)
            .map(|job| job.node_id)
            .collect();

    let mut out = Vec::with_capacity(task_results.len());
    for result in task_results {
        let node_id = result.node_id;
        let status = if result.status != NodeStatus::Completed && cancel_requested.contains(&node_id) {
            NodeStatus::Cancelled
        } else {
            result.status
        };
        job_manager::set_job_status(&conn, &meta.dispatch_id, node_id, status.as_str())?;

        let node_result = match status {
            NodeStatus::Completed => match result.output_uri {
                Some(uri) => NodeResult::completed(node_id, uri),
                None => NodeResult::failed(node_id, "executor reported completion without an output"),
            },
            NodeStatus::Failed => NodeResult::failed(
                node_id,
                result.error.unwrap_or_else(|| "task failed".to_string()),
            ),
            other => NodeResult::new(node_id, other),
        };
        out.push(node_result.with_streams(result.stdout_uri, result.stderr_uri));
    }
    Ok(out)
}

/// Drain the job-event queue until shutdown, collecting each job on its own
/// task.
pub async fn listen_for_job_events(
    dispatcher: Dispatcher,
    mut events: mpsc::Receiver<JobEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("job event listener started");
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                debug!(
                    dispatch_id = %event.meta.dispatch_id,
                    job = %event.job_handle,
                    status = ?event.status,
                    "job event received"
                );
                let dispatcher = dispatcher.clone();
                let span = task_group_span(&event.meta.dispatch_id, event.meta.task_group_id);
                tokio::spawn(
                    async move {
                        collect_task_group_results(&dispatcher, event).await;
                    }
                    .instrument(span),
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("job event listener exiting");
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::dag::manifest::{EdgeSpec, NodeSpec, OutputExpr};
    use crate::dag::node::{ExecutorSpec, NodeField};
    use crate::exec::local::LocalExecutor;
    use crate::exec::registry::{ExecutorContext, FunctionRegistry};
    use crate::store::{Database, DispatchRecord};

    fn edge(source: NodeId, target: NodeId, slot: Option<ArgSlot>) -> EdgeSpec {
        EdgeSpec {
            source,
            target,
            edge_name: "data".into(),
            slot,
        }
    }

    fn task(id: NodeId, group: NodeId) -> NodeSpec {
        NodeSpec {
            task_group_id: Some(group),
            ..NodeSpec::new(
                id,
                NodeKind::Task {
                    function: format!("f{id}"),
                },
            )
        }
    }

    /// 0 -> 2 (arg 1), 1 -> 2 (arg 0), 2 -> 3 (kwarg x), 0 -> 3 (wait_for);
    /// 2 and 3 share a task group.
    fn graph() -> TransportGraph {
        let db = Database::in_memory().unwrap();
        let manifest = WorkflowManifest {
            name: "wf".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![task(0, 0), task(1, 1), task(2, 2), task(3, 2)],
            edges: vec![
                edge(0, 2, Some(ArgSlot::Positional(1))),
                edge(1, 2, Some(ArgSlot::Positional(0))),
                edge(2, 3, Some(ArgSlot::Keyword("x".into()))),
                edge(0, 3, None),
            ],
            output: OutputExpr::Node(3),
        };
        let g = manifest.to_task_graph("local").unwrap();
        records::insert_dispatch_graph(&mut db.conn(), &DispatchRecord::new("d".into(), manifest), &g)
            .unwrap();
        TransportGraph::bare(db, "d")
    }

    fn complete(graph: &mut TransportGraph, id: NodeId, uri: &str) {
        graph
            .set_node_values(
                id,
                vec![
                    (NodeField::Status, Value::from("COMPLETED")),
                    (NodeField::OutputUri, Value::from(uri)),
                ],
            )
            .unwrap();
    }

    #[test]
    fn task_specs_reference_stored_outputs_and_group_members() {
        let mut g = graph();
        complete(&mut g, 0, "file:///zero.json");
        complete(&mut g, 1, "file:///one.json");
        let members = BTreeSet::from([2, 3]);

        let spec = build_task_spec(&g, &g.get_node(2).unwrap(), &members).unwrap();
        assert_eq!(
            spec.args,
            vec![
                InputRef::Asset {
                    uri: "file:///one.json".into()
                },
                InputRef::Asset {
                    uri: "file:///zero.json".into()
                },
            ]
        );

        let spec = build_task_spec(&g, &g.get_node(3).unwrap(), &members).unwrap();
        assert!(spec.args.is_empty());
        assert_eq!(spec.kwargs.get("x"), Some(&InputRef::Node { node_id: 2 }));
        assert_eq!(spec.function, "f3");
    }

    #[test]
    fn incomplete_inputs_are_rejected() {
        let mut g = graph();
        complete(&mut g, 1, "file:///one.json");
        let err = build_task_spec(&g, &g.get_node(2).unwrap(), &BTreeSet::from([2, 3])).unwrap_err();
        assert!(matches!(err, DispatchError::Validation(msg) if msg.contains("input node 0")));
    }

    fn registry() -> (ExecutorRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let ctx = ExecutorContext {
            assets: AssetManager::new(dir.path(), Database::in_memory().unwrap()).unwrap(),
            functions: FunctionRegistry::default(),
            job_events: tx,
        };
        let mut registry = ExecutorRegistry::new(ctx);
        registry.register("local", LocalExecutor::constructor(), Value::Null);
        (registry, dir)
    }

    fn child() -> WorkflowManifest {
        WorkflowManifest {
            name: "child".into(),
            metadata: LatticeMetadata::default(),
            nodes: vec![NodeSpec::new(0, NodeKind::Parameter { value: json!(1) })],
            edges: vec![],
            output: OutputExpr::Node(0),
        }
    }

    #[test]
    fn sublattices_inherit_unset_metadata() {
        let (registry, _dir) = registry();
        let parent = LatticeMetadata {
            executor: Some(ExecutorSpec::named("local")),
            workflow_executor: Some("local".into()),
            deps: DepsSpec {
                bash: Some(vec!["echo hi".into()]),
                pip: None,
            },
            call_before: None,
            call_after: None,
        };
        let mut own = child();
        own.metadata.deps.bash = Some(vec![]);

        let built = build_sublattice_manifest(own, &parent, &registry).unwrap();
        assert_eq!(built.metadata.executor, Some(ExecutorSpec::named("local")));
        assert_eq!(built.metadata.deps.bash, Some(vec![]));

        let built = build_sublattice_manifest(child(), &parent, &registry).unwrap();
        assert_eq!(built.metadata.deps.bash, Some(vec!["echo hi".to_string()]));
    }

    #[test]
    fn client_and_unknown_workflow_executors_are_rejected() {
        let (registry, _dir) = registry();
        for name in ["client", "dask"] {
            let parent = LatticeMetadata {
                workflow_executor: Some(name.into()),
                ..LatticeMetadata::default()
            };
            assert!(matches!(
                build_sublattice_manifest(child(), &parent, &registry),
                Err(DispatchError::Validation(_))
            ));
        }
    }
}
