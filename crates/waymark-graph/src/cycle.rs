//! Reachability check run before every edge insertion
//!
//! Inserting `milestone -> dependency` closes a cycle exactly when `milestone`
//! is already reachable from `dependency` along existing edges. The search is
//! a BFS with parent links so the offending path can be reported.

use crate::graph::DependencyGraph;
use std::collections::{HashMap, VecDeque};
use waymark_core::MilestoneId;

/// Path that the candidate edge would close, or `None` if the edge is safe.
///
/// The returned path starts and ends at `milestone`:
/// `[milestone, dependency, ..., milestone]`. A self-edge yields
/// `[milestone, milestone]`.
#[must_use]
pub fn cycle_path(
    graph: &DependencyGraph,
    milestone: MilestoneId,
    dependency: MilestoneId,
) -> Option<Vec<MilestoneId>> {
    if milestone == dependency {
        return Some(vec![milestone, milestone]);
    }
    if !graph.contains(dependency) || !graph.contains(milestone) {
        return None;
    }

    let mut parent: HashMap<MilestoneId, MilestoneId> = HashMap::new();
    let mut queue = VecDeque::from([dependency]);
    parent.insert(dependency, dependency);

    while let Some(current) = queue.pop_front() {
        if current == milestone {
            let mut path = vec![milestone];
            let mut cursor = current;
            while cursor != dependency {
                cursor = parent[&cursor];
                path.push(cursor);
            }
            path.push(milestone);
            path.reverse();
            return Some(path);
        }
        for (next, _) in graph.prerequisites(current) {
            if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(next) {
                slot.insert(current);
                queue.push_back(next);
            }
        }
    }

    None
}

/// Convenience predicate over [`cycle_path`]
#[inline]
#[must_use]
pub fn would_create_cycle(
    graph: &DependencyGraph,
    milestone: MilestoneId,
    dependency: MilestoneId,
) -> bool {
    cycle_path(graph, milestone, dependency).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeWeight;

    fn id(n: i64) -> MilestoneId {
        MilestoneId(n)
    }

    fn chain(edges: &[(i64, i64)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for &(m, d) in edges {
            g.insert_unchecked(id(m), id(d), EdgeWeight::required());
        }
        g
    }

    #[test]
    fn reverse_edge_is_a_cycle() {
        // M1 depends on M0
        let g = chain(&[(1, 0)]);
        assert_eq!(cycle_path(&g, id(0), id(1)), Some(vec![id(0), id(1), id(0)]));
    }

    #[test]
    fn long_cycle_reports_full_path() {
        // 3 -> 2 -> 1 -> 0
        let g = chain(&[(3, 2), (2, 1), (1, 0)]);
        assert_eq!(
            cycle_path(&g, id(0), id(3)),
            Some(vec![id(0), id(3), id(2), id(1), id(0)])
        );
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let g = chain(&[(3, 1), (3, 2), (1, 0), (2, 0)]);
        assert!(!would_create_cycle(&g, id(3), id(0)));
    }

    #[test]
    fn self_edge_is_reported() {
        let g = DependencyGraph::new();
        assert_eq!(cycle_path(&g, id(4), id(4)), Some(vec![id(4), id(4)]));
    }

    #[test]
    fn unknown_nodes_cannot_close_cycles() {
        let g = chain(&[(1, 0)]);
        assert!(!would_create_cycle(&g, id(9), id(1)));
        assert!(!would_create_cycle(&g, id(1), id(9)));
    }
}
