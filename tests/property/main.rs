mod diff;
mod scheduler;

use std::collections::BTreeSet;

use latticeflow::dag::manifest::{EdgeSpec, NodeSpec, WorkflowManifest};
use latticeflow::dag::node::{ArgSlot, NodeKind};
use latticeflow_test_utils::builders::ManifestBuilder;
use proptest::prelude::*;
use serde_json::json;

/// Random acyclic workflow: node `i` may only depend on nodes `0..i`.
/// Even ids are parameters when they have no parents.
pub fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = WorkflowManifest> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_nodes,
        )
        .prop_map(move |raw_deps| {
            let mut builder = ManifestBuilder::new("random");
            let mut edges = Vec::new();
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let parents: BTreeSet<usize> = if i == 0 {
                    BTreeSet::new()
                } else {
                    potential.into_iter().map(|p| p % i).collect()
                };
                builder = if parents.is_empty() && i % 2 == 0 {
                    builder.param(i as u32, json!(i))
                } else {
                    builder.task(i as u32, &format!("f{i}"))
                };
                for (slot, parent) in parents.into_iter().enumerate() {
                    edges.push((parent as u32, i as u32, slot));
                }
            }
            for (source, target, slot) in edges {
                builder = builder.arg(source, target, slot);
            }
            builder.build()
        })
    })
}

/// Random workflow whose task nodes are folded into task groups. Each task
/// may join the group of an earlier task; assignments that break group
/// rules (mixed kinds, non-convex groups) are filtered out.
pub fn grouped_dag_strategy(max_nodes: usize) -> impl Strategy<Value = WorkflowManifest> {
    (
        dag_strategy(max_nodes),
        proptest::collection::vec(proptest::option::weighted(0.3, any::<usize>()), max_nodes),
    )
        .prop_map(|(mut manifest, joins)| {
            let tasks: Vec<u32> = manifest
                .nodes
                .iter()
                .filter(|n| matches!(n.kind, NodeKind::Task { .. }))
                .map(|n| n.node_id)
                .collect();
            for (pos, join) in joins.into_iter().enumerate().take(tasks.len()) {
                let (Some(join), true) = (join, pos > 0) else {
                    continue;
                };
                let leader = tasks[join % pos];
                let group = manifest
                    .nodes
                    .iter()
                    .find(|n| n.node_id == leader)
                    .and_then(|n| n.task_group_id)
                    .unwrap_or(leader);
                if let Some(spec) = manifest.nodes.iter_mut().find(|n| n.node_id == tasks[pos]) {
                    spec.task_group_id = Some(group);
                }
            }
            manifest
        })
        .prop_filter("task groups must validate", |m| m.to_task_graph("local").is_ok())
}

/// Same workflow with the value of parameter `node_id` replaced.
pub fn with_parameter(manifest: &WorkflowManifest, node_id: u32, value: i64) -> WorkflowManifest {
    let mut changed = manifest.clone();
    for spec in &mut changed.nodes {
        if spec.node_id == node_id && matches!(spec.kind, NodeKind::Parameter { .. }) {
            *spec = NodeSpec::new(node_id, NodeKind::Parameter { value: json!(value) });
        }
    }
    changed
}

/// Same workflow with one extra edge slot on `target`'s incoming edge.
pub fn rewired(manifest: &WorkflowManifest, index: usize) -> WorkflowManifest {
    let mut changed = manifest.clone();
    if !changed.edges.is_empty() {
        let i = index % changed.edges.len();
        let edge = &changed.edges[i];
        changed.edges[i] = EdgeSpec {
            source: edge.source,
            target: edge.target,
            edge_name: edge.edge_name.clone(),
            slot: Some(ArgSlot::Keyword("rewired".to_string())),
        };
    }
    changed
}
