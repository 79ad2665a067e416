// src/dag/diff.rs

//! Graph diffing for redispatch.
//!
//! [`max_cbms`] computes a "maximum backward-maximal common subgraph" of two
//! task graphs: the nodes whose whole ancestry (structure, edge attributes
//! and node attributes) is identical in both. Those nodes can reuse results
//! from the old dispatch.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::dag::graph::TaskGraph;
use crate::errors::{DispatchError, Result};
use crate::types::NodeId;

/// Id reserved for the synthetic root joining all parentless nodes.
pub const VIRTUAL_ROOT: NodeId = NodeId::MAX;

const UNVISITED: i8 = 0;
const REUSABLE: i8 = 1;
const INVALID: i8 = -1;

/// Per-node reusability, `true` meaning reusable.
pub type ReuseMap = BTreeMap<NodeId, bool>;

/// Default node comparison: same task name and same literal parameter value.
pub fn same_name_and_value(a: &TaskGraph, b: &TaskGraph, node_id: NodeId) -> bool {
    match (a.node(node_id), b.node(node_id)) {
        (Some(x), Some(y)) => {
            x.name == y.name && x.kind.parameter_value() == y.kind.parameter_value()
        }
        _ => false,
    }
}

/// Default edge comparison: the multisets of edge attributes between
/// `parent` and `child` are equal.
pub fn same_edge_attributes(a: &TaskGraph, b: &TaskGraph, parent: NodeId, child: NodeId) -> bool {
    a.edge_attrs_between(parent, child) == b.edge_attrs_between(parent, child)
}

fn children_of(graph: &TaskGraph, node_id: NodeId) -> Vec<NodeId> {
    if node_id == VIRTUAL_ROOT {
        graph.roots()
    } else {
        graph.children(node_id)
    }
}

fn invalidate(graph: &TaskGraph, status: &mut BTreeMap<NodeId, i8>, start: NodeId) {
    status.insert(start, INVALID);
    for id in graph.descendants(start) {
        status.insert(id, INVALID);
    }
}

/// Compare `a` (old) and `b` (new) and return the reusability of every node
/// of each graph.
///
/// The frontier is processed as a stack. Any mismatch invalidates the node
/// and everything reachable from it, so the result does not depend on the
/// order in which converging paths are visited.
pub fn max_cbms<N, E>(
    a: &TaskGraph,
    b: &TaskGraph,
    node_cmp: N,
    edge_cmp: E,
) -> Result<(ReuseMap, ReuseMap)>
where
    N: Fn(&TaskGraph, &TaskGraph, NodeId) -> bool,
    E: Fn(&TaskGraph, &TaskGraph, NodeId, NodeId) -> bool,
{
    if a.contains(VIRTUAL_ROOT) || b.contains(VIRTUAL_ROOT) {
        return Err(DispatchError::DiffIntegrity(format!(
            "encountered forbidden node id {VIRTUAL_ROOT}"
        )));
    }

    let mut a_status: BTreeMap<NodeId, i8> = a.node_ids().map(|id| (id, UNVISITED)).collect();
    let mut b_status: BTreeMap<NodeId, i8> = b.node_ids().map(|id| (id, UNVISITED)).collect();

    let mut stack = vec![VIRTUAL_ROOT];

    while let Some(current) = stack.pop() {
        trace!(node_id = current, "diff: visiting node");
        let a_children = children_of(a, current);
        let b_children = children_of(b, current);
        let b_child_set: BTreeSet<NodeId> = b_children.iter().copied().collect();
        let a_child_set: BTreeSet<NodeId> = a_children.iter().copied().collect();

        for y in a_children {
            if a_status.get(&y) == Some(&INVALID) {
                continue;
            }

            if !b_child_set.contains(&y) {
                debug!(node_id = y, parent = current, "diff: child missing in new graph");
                invalidate(a, &mut a_status, y);
                continue;
            }

            if b_status.get(&y) == Some(&INVALID) {
                invalidate(a, &mut a_status, y);
                continue;
            }

            if !edge_cmp(a, b, current, y) {
                debug!(node_id = y, parent = current, "diff: edge attributes differ");
                invalidate(a, &mut a_status, y);
                invalidate(b, &mut b_status, y);
                continue;
            }

            if !node_cmp(a, b, y) {
                debug!(node_id = y, "diff: node attributes differ");
                invalidate(a, &mut a_status, y);
                invalidate(b, &mut b_status, y);
                continue;
            }

            if a_status.get(&y) == Some(&UNVISITED) {
                a_status.insert(y, REUSABLE);
                b_status.insert(y, REUSABLE);
                stack.push(y);
            }
        }

        // Children that only exist in B, or whose A copy was invalidated.
        for y in b_children {
            if b_status.get(&y) == Some(&INVALID) {
                continue;
            }
            if !a_child_set.contains(&y) || a_status.get(&y) == Some(&INVALID) {
                debug!(node_id = y, parent = current, "diff: pruning child of new graph");
                invalidate(b, &mut b_status, y);
            }
        }
    }

    let to_bool = |m: BTreeMap<NodeId, i8>| -> ReuseMap {
        m.into_iter().map(|(k, v)| (k, v == REUSABLE)).collect()
    };
    Ok((to_bool(a_status), to_bool(b_status)))
}

/// Node ids of `new` whose results can be taken over from `old`.
///
/// A node qualifies only when it is reusable from both sides of the diff.
pub fn compare_transport_graphs(old: &TaskGraph, new: &TaskGraph) -> Result<BTreeSet<NodeId>> {
    let (old_status, new_status) = max_cbms(old, new, same_name_and_value, same_edge_attributes)?;
    Ok(new_status
        .into_iter()
        .filter(|(id, reusable)| *reusable && old_status.get(id) == Some(&true))
        .map(|(id, _)| id)
        .collect())
}
