use std::collections::{BTreeMap, BTreeSet, VecDeque};

use proptest::prelude::*;

use latticeflow::dag::Scheduler;
use latticeflow::dag::manifest::WorkflowManifest;
use latticeflow::tracker::NodeResult;
use latticeflow::types::{NodeId, NodeStatus};
use latticeflow_test_utils::fixtures::stored_graph;

use crate::{dag_strategy, grouped_dag_strategy};

fn scheduler(manifest: WorkflowManifest) -> Scheduler {
    Scheduler::new(stored_graph(manifest, "d")).unwrap()
}

proptest! {
    #[test]
    fn scheduler_terminates_with_every_node_terminal(
        manifest in dag_strategy(10),
        failing in proptest::collection::btree_set(0..10u32, 0..3),
    ) {
        let parents: BTreeMap<NodeId, Vec<NodeId>> = {
            let graph = manifest.to_task_graph("local").unwrap();
            graph.node_ids().map(|id| (id, graph.parents(id))).collect()
        };
        let mut s = scheduler(manifest);

        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut submitted = BTreeSet::new();
        let mut finished = false;

        let step = s.start().unwrap();
        finished |= step.dispatch_finished;
        queue.extend(step.newly_scheduled.iter().flat_map(|g| g.node_ids.clone()));

        let mut guard = 0;
        while let Some(id) = queue.pop_front() {
            guard += 1;
            prop_assert!(guard < 1000, "scheduler did not settle");
            prop_assert!(submitted.insert(id), "node {} scheduled twice", id);

            let statuses = s.statuses();
            for parent in &parents[&id] {
                prop_assert_eq!(statuses[parent], NodeStatus::Completed);
            }

            let result = if failing.contains(&id) {
                NodeResult::failed(id, format!("node {id} failed"))
            } else {
                NodeResult::completed(id, format!("file:///tmp/{id}.json"))
            };
            let step = s.apply(&result).unwrap();
            finished |= step.dispatch_finished;
            queue.extend(step.newly_scheduled.iter().flat_map(|g| g.node_ids.clone()));
        }

        prop_assert!(finished);
        prop_assert!(s.statuses().values().all(|st| st.is_terminal()));
        if s.statuses().values().all(|st| *st == NodeStatus::Completed) {
            prop_assert!(s.first_failure().is_none());
        }
    }

    #[test]
    fn failures_only_cancel_descendants(
        manifest in dag_strategy(10),
        fail in 0..10u32,
    ) {
        let graph = manifest.to_task_graph("local").unwrap();
        prop_assume!(graph.contains(fail));
        prop_assume!(!graph.node(fail).unwrap().is_parameter());
        let descendants = graph.descendants(fail);

        let mut s = scheduler(manifest);
        let mut queue: VecDeque<NodeId> = s
            .start()
            .unwrap()
            .newly_scheduled
            .iter()
            .flat_map(|g| g.node_ids.clone())
            .collect();
        while let Some(id) = queue.pop_front() {
            let result = if id == fail {
                NodeResult::failed(id, "boom")
            } else {
                NodeResult::completed(id, format!("file:///tmp/{id}.json"))
            };
            let step = s.apply(&result).unwrap();
            queue.extend(step.newly_scheduled.iter().flat_map(|g| g.node_ids.clone()));
        }

        for (id, status) in s.statuses() {
            let expected = if id == fail {
                NodeStatus::Failed
            } else if descendants.contains(&id) {
                NodeStatus::Cancelled
            } else {
                NodeStatus::Completed
            };
            prop_assert_eq!(status, expected, "node {}", id);
        }
        prop_assert_eq!(s.first_failure().map(|f| f.node_id), Some(fail));
    }

    #[test]
    fn grouped_workflows_terminate_after_failures_and_cancels(
        manifest in grouped_dag_strategy(10),
        failing in proptest::collection::btree_set(0..10u32, 0..3),
        cancel_first in proptest::option::of(0..10u32),
    ) {
        let graph = manifest.to_task_graph("local").unwrap();
        let mut s = scheduler(manifest);

        let mut groups: VecDeque<Vec<NodeId>> = VecDeque::new();
        let mut finished = false;

        if let Some(id) = cancel_first {
            finished |= s.cancel_unsubmitted(Some(&[id][..])).unwrap().dispatch_finished;
        }
        let step = s.start().unwrap();
        finished |= step.dispatch_finished;
        groups.extend(step.newly_scheduled.into_iter().map(|g| g.node_ids));

        let mut guard = 0;
        while let Some(members) = groups.pop_front() {
            guard += 1;
            prop_assert!(guard < 1000, "scheduler did not settle");

            let statuses = s.statuses();
            for id in &members {
                for parent in graph.parents(*id) {
                    if !members.contains(&parent) {
                        prop_assert_eq!(statuses[&parent], NodeStatus::Completed);
                    }
                }
            }

            // Members after a failed one are aborted by the runner.
            let mut group_failed = false;
            for id in members {
                let result = if group_failed {
                    NodeResult::cancelled(id)
                } else if failing.contains(&id) {
                    group_failed = true;
                    NodeResult::failed(id, format!("node {id} failed"))
                } else {
                    NodeResult::completed(id, format!("file:///tmp/{id}.json"))
                };
                let step = s.apply(&result).unwrap();
                finished |= step.dispatch_finished;
                groups.extend(step.newly_scheduled.into_iter().map(|g| g.node_ids));
            }
        }

        prop_assert!(finished, "dispatch never finished: {:?}", s.statuses());
        prop_assert!(s.statuses().values().all(|st| st.is_terminal()));
    }
}
