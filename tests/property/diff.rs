use proptest::prelude::*;

use latticeflow::dag::diff::compare_transport_graphs;

use crate::{dag_strategy, rewired, with_parameter};

proptest! {
    #[test]
    fn identical_graphs_are_fully_reusable(manifest in dag_strategy(12)) {
        let graph = manifest.to_task_graph("local").unwrap();
        let reusable = compare_transport_graphs(&graph, &graph).unwrap();
        let all: Vec<u32> = graph.node_ids().collect();
        prop_assert_eq!(reusable.into_iter().collect::<Vec<_>>(), all);
    }

    #[test]
    fn changed_parameter_invalidates_exactly_its_descendants(
        manifest in dag_strategy(12),
        pick in any::<usize>(),
    ) {
        let old = manifest.to_task_graph("local").unwrap();
        let params: Vec<u32> = old
            .nodes()
            .filter(|n| n.is_parameter())
            .map(|n| n.node_id)
            .collect();
        prop_assume!(!params.is_empty());
        let changed_id = params[pick % params.len()];

        let new = with_parameter(&manifest, changed_id, -1).to_task_graph("local").unwrap();
        let reusable = compare_transport_graphs(&old, &new).unwrap();

        let mut invalid = old.descendants(changed_id);
        invalid.insert(changed_id);
        for id in old.node_ids() {
            prop_assert_eq!(reusable.contains(&id), !invalid.contains(&id), "node {}", id);
        }
    }

    #[test]
    fn reusable_nodes_have_reusable_parents(
        manifest in dag_strategy(12),
        index in any::<usize>(),
    ) {
        let old = manifest.to_task_graph("local").unwrap();
        let new = rewired(&manifest, index).to_task_graph("local").unwrap();
        let reusable = compare_transport_graphs(&old, &new).unwrap();

        for id in &reusable {
            for parent in new.parents(*id) {
                prop_assert!(reusable.contains(&parent), "{} reusable but parent {} is not", id, parent);
            }
        }
    }
}
