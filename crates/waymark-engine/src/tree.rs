//! Per-user view of the whole catalog

use crate::error::Result;
use crate::validator::{DependencyValidator, UnmetDependency};
use serde::Serialize;
use std::collections::HashMap;
use waymark_core::{MilestoneCode, MilestoneStatus, MilestoneType, UserId};
use waymark_store::StoreTx;

/// One milestone as seen by one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    /// Milestone code
    pub code: MilestoneCode,
    /// Display name
    pub name: String,
    /// Position in the catalog
    pub order_index: i32,
    /// Kind of milestone
    pub milestone_type: MilestoneType,
    /// Needs a paid subscription
    pub requires_payment: bool,
    /// Unlocked by the cascade
    pub auto_unlock: bool,
    /// LOCKED when the user has no row yet
    pub status: MilestoneStatus,
    /// User's completion, 0 without a row
    pub completion_percentage: u8,
    /// Required prerequisites (and their conditions) are satisfied
    pub eligible: bool,
    /// Direct prerequisites, required and optional
    pub prerequisites: Vec<MilestoneCode>,
    /// Required prerequisites still blocking
    pub unmet: Vec<UnmetDependency>,
}

/// Every milestone in `order_index` order with the user's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTree {
    /// Owner of the view
    pub user: UserId,
    /// One node per milestone
    pub milestones: Vec<TreeNode>,
}

impl UserTree {
    /// Number of completed milestones
    #[must_use]
    pub fn completed(&self) -> usize {
        self.milestones
            .iter()
            .filter(|node| node.status == MilestoneStatus::Completed)
            .count()
    }

    /// Share of the catalog completed, 0 - 100
    #[must_use]
    pub fn overall_percentage(&self) -> u8 {
        if self.milestones.is_empty() {
            return 0;
        }
        let percent = self.completed() * 100 / self.milestones.len();
        u8::try_from(percent).unwrap_or(100)
    }

    /// Node for `code`
    #[must_use]
    pub fn node(&self, code: &MilestoneCode) -> Option<&TreeNode> {
        self.milestones.iter().find(|node| &node.code == code)
    }
}

pub(crate) fn build(
    tx: &dyn StoreTx,
    validator: &DependencyValidator,
    user: UserId,
) -> Result<UserTree> {
    let catalog = tx.milestones()?;
    let codes: HashMap<_, _> = catalog.iter().map(|m| (m.id, m.code.clone())).collect();
    let rows: HashMap<_, _> = tx
        .user_progress(user)?
        .into_iter()
        .map(|row| (row.milestone_id, row))
        .collect();

    let mut milestones = Vec::with_capacity(catalog.len());
    for milestone in catalog {
        let prerequisites = tx
            .edges_into(milestone.id)?
            .iter()
            .filter(|edge| edge.is_required)
            .filter_map(|edge| codes.get(&edge.dependency_id).cloned())
            .collect();
        let outcome = validator.validate(tx, user, &milestone, true)?;
        let row = rows.get(&milestone.id);

        milestones.push(TreeNode {
            status: row.map_or(MilestoneStatus::Locked, |r| r.status),
            completion_percentage: row.map_or(0, |r| r.effective_completion()),
            eligible: outcome.met,
            prerequisites,
            unmet: outcome.unmet,
            code: milestone.code,
            name: milestone.name,
            order_index: milestone.order_index,
            milestone_type: milestone.milestone_type,
            requires_payment: milestone.requires_payment,
            auto_unlock: milestone.auto_unlock,
        });
    }

    Ok(UserTree { user, milestones })
}
