//! Checked graph mutations on top of [`StoreTx`]
//!
//! Edge insertion validates against an adjacency view loaded inside the same
//! transaction, so the check and the write see the same edge set.

use crate::{StoreError, StoreTx};
use std::collections::HashMap;
use waymark_core::{
    DependencySpec, GraphError, Milestone, MilestoneCode, MilestoneDependency, Timestamp,
};
use waymark_graph::{DependencyGraph, EdgeRejection};

/// Look up a milestone by code or fail with [`StoreError::UnknownMilestone`]
pub fn resolve_code(tx: &dyn StoreTx, code: &MilestoneCode) -> Result<Milestone, StoreError> {
    tx.milestone_by_code(code)?
        .ok_or_else(|| StoreError::UnknownMilestone(code.to_string()))
}

/// Adjacency view of every milestone and edge visible to `tx`
pub fn load_graph(tx: &dyn StoreTx) -> Result<DependencyGraph, StoreError> {
    let nodes = tx.milestones()?.into_iter().map(|m| m.id);
    let edges = tx.all_edges()?;
    Ok(DependencyGraph::from_edges(nodes, &edges))
}

/// Insert `milestone -> dependency` after the self-reference, duplicate and
/// cycle checks. Nothing is written when a check fails.
pub fn add_edge(
    tx: &mut dyn StoreTx,
    milestone: &MilestoneCode,
    dependency: &MilestoneCode,
    spec: DependencySpec,
    now: Timestamp,
) -> Result<MilestoneDependency, StoreError> {
    let source = resolve_code(&*tx, milestone)?;
    let target = resolve_code(&*tx, dependency)?;

    if spec.minimum_completion_percentage > 100 {
        return Err(GraphError::InvalidThreshold(spec.minimum_completion_percentage).into());
    }

    let edge = spec.into_edge(source.id, target.id, now);
    let mut graph = load_graph(&*tx)?;
    match graph.try_add_edge(source.id, target.id, (&edge).into()) {
        Ok(()) => {}
        Err(EdgeRejection::SelfReference) => {
            return Err(GraphError::SelfReference(source.code).into());
        }
        Err(EdgeRejection::Duplicate) => {
            return Err(GraphError::DuplicateEdge {
                milestone: source.code,
                dependency: target.code,
            }
            .into());
        }
        Err(EdgeRejection::Cycle(ids)) => {
            let codes: HashMap<_, _> = tx
                .milestones()?
                .into_iter()
                .map(|m| (m.id, m.code))
                .collect();
            let path = ids
                .iter()
                .map(|id| {
                    codes
                        .get(id)
                        .cloned()
                        .ok_or_else(|| StoreError::UnknownMilestone(id.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Err(GraphError::Cycle { path }.into());
        }
    }

    tx.insert_edge(&edge)?;
    tracing::debug!(
        milestone = %source.code,
        dependency = %target.code,
        required = edge.is_required,
        "dependency edge stored"
    );
    Ok(edge)
}

/// Delete `milestone -> dependency`; returns whether it existed
pub fn remove_edge(
    tx: &mut dyn StoreTx,
    milestone: &MilestoneCode,
    dependency: &MilestoneCode,
) -> Result<bool, StoreError> {
    let source = resolve_code(&*tx, milestone)?;
    let target = resolve_code(&*tx, dependency)?;
    tx.delete_edge(source.id, target.id)
}
