//! Adjacency view of the dependency DAG
//!
//! Built from persisted edges inside a transaction, used to reject cycles
//! before an edge is written and to order dependency chains.

use crate::cycle;
use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, HashSet};
use waymark_core::{MilestoneDependency, MilestoneId};

/// Weight carried by each edge of the adjacency view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeWeight {
    /// Whether the prerequisite gates the dependent
    pub required: bool,
    /// Completion percentage the prerequisite must reach
    pub min_completion: u8,
}

impl EdgeWeight {
    /// Required edge at 100%
    #[inline]
    #[must_use]
    pub fn required() -> Self {
        Self {
            required: true,
            min_completion: 100,
        }
    }

    /// Optional edge
    #[inline]
    #[must_use]
    pub fn optional() -> Self {
        Self {
            required: false,
            min_completion: 100,
        }
    }
}

impl From<&MilestoneDependency> for EdgeWeight {
    fn from(edge: &MilestoneDependency) -> Self {
        Self {
            required: edge.is_required,
            min_completion: edge.minimum_completion_percentage,
        }
    }
}

/// Edge rejected by [`DependencyGraph::try_add_edge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRejection {
    /// Milestone would depend on itself
    SelfReference,
    /// Edge already present
    Duplicate,
    /// `[milestone, dependency, ..., milestone]`
    Cycle(Vec<MilestoneId>),
}

/// In-memory adjacency view of the dependency DAG.
///
/// Edges point from a milestone to its prerequisite (`milestone -> dependency`),
/// so outgoing neighbours are prerequisites and incoming neighbours are
/// dependents.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    inner: DiGraphMap<MilestoneId, EdgeWeight>,
}

impl DependencyGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted edges (plus nodes that have none)
    pub fn from_edges<'a>(
        nodes: impl IntoIterator<Item = MilestoneId>,
        edges: impl IntoIterator<Item = &'a MilestoneDependency>,
    ) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for edge in edges {
            graph.insert_unchecked(edge.milestone_id, edge.dependency_id, edge.into());
        }
        graph
    }

    /// Add a node; no-op if present
    pub fn add_node(&mut self, id: MilestoneId) {
        self.inner.add_node(id);
    }

    /// Whether `id` is a node
    pub fn contains(&self, id: MilestoneId) -> bool {
        self.inner.contains_node(id)
    }

    /// Whether `milestone -> dependency` exists
    pub fn contains_edge(&self, milestone: MilestoneId, dependency: MilestoneId) -> bool {
        self.inner.contains_edge(milestone, dependency)
    }

    /// Insert without any check; only for loading edges already known to be valid
    pub fn insert_unchecked(
        &mut self,
        milestone: MilestoneId,
        dependency: MilestoneId,
        weight: EdgeWeight,
    ) {
        self.inner.add_edge(milestone, dependency, weight);
    }

    /// Insert after the self-reference, duplicate and cycle checks.
    ///
    /// The graph is left untouched on rejection.
    pub fn try_add_edge(
        &mut self,
        milestone: MilestoneId,
        dependency: MilestoneId,
        weight: EdgeWeight,
    ) -> Result<(), EdgeRejection> {
        if milestone == dependency {
            return Err(EdgeRejection::SelfReference);
        }
        if self.contains_edge(milestone, dependency) {
            return Err(EdgeRejection::Duplicate);
        }
        self.add_node(milestone);
        self.add_node(dependency);
        if let Some(path) = cycle::cycle_path(self, milestone, dependency) {
            return Err(EdgeRejection::Cycle(path));
        }
        self.inner.add_edge(milestone, dependency, weight);
        Ok(())
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Direct prerequisites of `id`
    pub fn prerequisites(&self, id: MilestoneId) -> Vec<(MilestoneId, EdgeWeight)> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.inner
            .edges_directed(id, Direction::Outgoing)
            .map(|(_, dependency, weight)| (dependency, *weight))
            .collect()
    }

    /// Direct dependents of `id`
    pub fn dependents(&self, id: MilestoneId) -> Vec<(MilestoneId, EdgeWeight)> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.inner
            .neighbors_directed(id, Direction::Incoming)
            .filter_map(|milestone| {
                self.inner
                    .edge_weight(milestone, id)
                    .map(|weight| (milestone, *weight))
            })
            .collect()
    }

    /// Whole-graph integrity check
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.inner)
    }

    /// All transitive prerequisites of `id`, roots first.
    ///
    /// Optional edges are followed only when `include_optional` is set. Ties
    /// between independent prerequisites are broken by id so the order is
    /// stable across calls.
    pub fn dependency_chain(&self, id: MilestoneId, include_optional: bool) -> Vec<MilestoneId> {
        let follows = |w: &EdgeWeight| include_optional || w.required;

        let mut ancestors: HashSet<MilestoneId> = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for (dependency, weight) in self.prerequisites(current) {
                if follows(&weight) && ancestors.insert(dependency) {
                    stack.push(dependency);
                }
            }
        }
        ancestors.remove(&id);

        // Kahn's algorithm restricted to the ancestor set.
        let mut pending: HashMap<MilestoneId, usize> = ancestors
            .iter()
            .map(|&node| {
                let count = self
                    .prerequisites(node)
                    .iter()
                    .filter(|(dep, w)| follows(w) && ancestors.contains(dep))
                    .count();
                (node, count)
            })
            .collect();
        let mut ready: BTreeSet<MilestoneId> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(ancestors.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for (dependent, weight) in self.dependents(node) {
                if !follows(&weight) {
                    continue;
                }
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> MilestoneId {
        MilestoneId(n)
    }

    #[test]
    fn rejects_simple_cycle() {
        let mut g = DependencyGraph::new();
        g.try_add_edge(id(1), id(0), EdgeWeight::required()).unwrap();
        g.try_add_edge(id(2), id(1), EdgeWeight::required()).unwrap();

        let err = g.try_add_edge(id(0), id(2), EdgeWeight::required()).unwrap_err();
        assert_eq!(err, EdgeRejection::Cycle(vec![id(0), id(2), id(1), id(0)]));
        assert_eq!(g.edge_count(), 2);
        assert!(g.is_acyclic());
    }

    #[test]
    fn rejects_self_and_duplicate_edges() {
        let mut g = DependencyGraph::new();
        assert_eq!(
            g.try_add_edge(id(1), id(1), EdgeWeight::required()),
            Err(EdgeRejection::SelfReference)
        );
        g.try_add_edge(id(1), id(0), EdgeWeight::required()).unwrap();
        assert_eq!(
            g.try_add_edge(id(1), id(0), EdgeWeight::optional()),
            Err(EdgeRejection::Duplicate)
        );
    }

    #[test]
    fn chain_is_roots_first() {
        let mut g = DependencyGraph::new();
        g.try_add_edge(id(1), id(0), EdgeWeight::required()).unwrap();
        g.try_add_edge(id(2), id(1), EdgeWeight::required()).unwrap();
        g.try_add_edge(id(3), id(2), EdgeWeight::required()).unwrap();
        g.try_add_edge(id(3), id(0), EdgeWeight::required()).unwrap();

        assert_eq!(g.dependency_chain(id(3), false), vec![id(0), id(1), id(2)]);
        assert!(g.dependency_chain(id(0), false).is_empty());
    }

    #[test]
    fn chain_skips_optional_unless_asked() {
        let mut g = DependencyGraph::new();
        g.try_add_edge(id(2), id(1), EdgeWeight::required()).unwrap();
        g.try_add_edge(id(2), id(5), EdgeWeight::optional()).unwrap();
        g.try_add_edge(id(5), id(4), EdgeWeight::required()).unwrap();

        assert_eq!(g.dependency_chain(id(2), false), vec![id(1)]);
        assert_eq!(g.dependency_chain(id(2), true), vec![id(1), id(4), id(5)]);
    }
}
