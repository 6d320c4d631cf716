use proptest::prelude::*;
use waymark_graph::{DependencyGraph, EdgeRejection, EdgeWeight};
use waymark_core::MilestoneId;

proptest! {
    #[test]
    fn prop_accepted_edges_stay_acyclic(
        node_count in 1..20i64,
        edges in proptest::collection::vec((0..20i64, 0..20i64), 0..60)
    ) {
        let mut dag = DependencyGraph::new();
        for n in 0..node_count {
            dag.add_node(MilestoneId(n));
        }

        for (from, to) in edges {
            if from >= node_count || to >= node_count {
                continue;
            }
            let (from, to) = (MilestoneId(from), MilestoneId(to));
            let before = dag.edge_count();

            match dag.try_add_edge(from, to, EdgeWeight::required()) {
                Ok(()) => prop_assert_eq!(dag.edge_count(), before + 1),
                Err(EdgeRejection::Cycle(path)) => {
                    prop_assert_eq!(dag.edge_count(), before);
                    prop_assert_eq!(path.first(), Some(&from));
                    prop_assert_eq!(path.last(), Some(&from));
                    // Every hop after the candidate edge is an existing edge.
                    for pair in path[1..].windows(2) {
                        prop_assert!(dag.contains_edge(pair[0], pair[1]));
                    }
                }
                Err(EdgeRejection::SelfReference) => prop_assert_eq!(from, to),
                Err(EdgeRejection::Duplicate) => prop_assert!(dag.contains_edge(from, to)),
            }

            prop_assert!(dag.is_acyclic());
        }
    }

    #[test]
    fn prop_chain_precedes_dependents(
        edges in proptest::collection::vec((0..12i64, 0..12i64), 0..40)
    ) {
        let mut dag = DependencyGraph::new();
        for (from, to) in edges {
            let _ = dag.try_add_edge(MilestoneId(from), MilestoneId(to), EdgeWeight::required());
        }

        for target in 0..12 {
            let chain = dag.dependency_chain(MilestoneId(target), false);
            let pos = |id: MilestoneId| chain.iter().position(|x| *x == id);
            for (i, node) in chain.iter().enumerate() {
                for (prereq, _) in dag.prerequisites(*node) {
                    let p = pos(prereq).expect("prerequisite of an ancestor is an ancestor");
                    prop_assert!(p < i);
                }
            }
        }
    }
}

#[test]
fn rejected_edge_leaves_graph_unchanged() {
    let mut dag = DependencyGraph::new();
    let (m0, m1) = (MilestoneId(0), MilestoneId(1));

    dag.try_add_edge(m1, m0, EdgeWeight::required()).unwrap();
    assert!(matches!(
        dag.try_add_edge(m0, m1, EdgeWeight::required()),
        Err(EdgeRejection::Cycle(_))
    ));

    assert_eq!(dag.edge_count(), 1);
    assert!(dag.contains_edge(m1, m0));
    assert!(!dag.contains_edge(m0, m1));
}

#[test]
fn wide_graph_with_edges() {
    let mut dag = DependencyGraph::new();
    for i in 1..500 {
        dag.try_add_edge(MilestoneId(i), MilestoneId(i - 1), EdgeWeight::required())
            .expect("chain edge should be accepted");
    }
    assert_eq!(dag.edge_count(), 499);
    assert_eq!(dag.dependency_chain(MilestoneId(499), false).len(), 499);
    assert!(dag.try_add_edge(MilestoneId(0), MilestoneId(499), EdgeWeight::required()).is_err());
}
