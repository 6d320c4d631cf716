//! Auto-unlock cascade
//!
//! When a milestone completes (or crosses a partial threshold), each direct
//! dependent that auto-unlocks is re-validated and moved from LOCKED/absent
//! to AVAILABLE if it is now eligible. One hop only: dependents further down
//! unlock when their own prerequisites complete.

use crate::error::Result;
use crate::progress::make_available;
use crate::validator::DependencyValidator;
use waymark_core::{
    Milestone, MilestoneCode, MilestoneDependency, MilestoneStatus, Timestamp, UserId,
};
use waymark_store::{StoreError, StoreTx};

/// Which outgoing edges of the source milestone to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Source completed; every dependent is re-evaluated
    Completed,
    /// Source moved from `from`% to `to`%; only edges whose threshold lies in
    /// `(from, to]` are re-evaluated
    Progressed { from: u8, to: u8 },
}

impl Trigger {
    fn follows(self, edge: &MilestoneDependency) -> bool {
        match self {
            Self::Completed => true,
            Self::Progressed { from, to } => {
                from < edge.minimum_completion_percentage
                    && edge.minimum_completion_percentage <= to
            }
        }
    }
}

/// Runs the cascade inside the triggering transaction
#[derive(Debug, Clone, Copy)]
pub struct Cascader<'a> {
    validator: &'a DependencyValidator,
}

impl<'a> Cascader<'a> {
    /// Cascade checking eligibility with `validator`
    #[must_use]
    pub fn new(validator: &'a DependencyValidator) -> Self {
        Self { validator }
    }

    /// Unlock the eligible dependents of `source`; returns their codes by
    /// `order_index`.
    pub fn run(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        source: &Milestone,
        trigger: Trigger,
        now: Timestamp,
    ) -> Result<Vec<MilestoneCode>> {
        let mut unlocked: Vec<Milestone> = Vec::new();

        for edge in tx.edges_out_of(source.id)? {
            if !trigger.follows(&edge) {
                continue;
            }
            let dependent = tx
                .milestone(edge.milestone_id)?
                .ok_or_else(|| StoreError::UnknownMilestone(edge.milestone_id.to_string()))?;
            if !dependent.auto_unlock {
                tracing::debug!(%user, milestone = %dependent.code, "dependent needs explicit unlock");
                continue;
            }

            let existing = tx.progress(user, dependent.id)?;
            if existing
                .as_ref()
                .is_some_and(|row| row.status != MilestoneStatus::Locked)
            {
                continue;
            }

            let outcome = self.validator.validate(&*tx, user, &dependent, true)?;
            if !outcome.met {
                tracing::debug!(
                    %user,
                    milestone = %dependent.code,
                    unmet = outcome.unmet.len(),
                    "dependent still blocked"
                );
                continue;
            }

            make_available(tx, user, &dependent, existing, now)?;
            unlocked.push(dependent);
        }

        unlocked.sort_by_key(|m| (m.order_index, m.id));
        let codes: Vec<MilestoneCode> = unlocked.into_iter().map(|m| m.code).collect();
        if !codes.is_empty() {
            tracing::info!(%user, source = %source.code, unlocked = ?codes, "cascade unlocked dependents");
        }
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use waymark_core::MilestoneId;

    fn edge(min: u8) -> MilestoneDependency {
        MilestoneDependency {
            milestone_id: MilestoneId(2),
            dependency_id: MilestoneId(1),
            is_required: true,
            minimum_completion_percentage: min,
            conditions: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn progress_trigger_follows_crossed_thresholds_only() {
        let trigger = Trigger::Progressed { from: 40, to: 60 };
        assert!(trigger.follows(&edge(50)));
        assert!(trigger.follows(&edge(60)));
        assert!(!trigger.follows(&edge(40)));
        assert!(!trigger.follows(&edge(100)));
        assert!(Trigger::Completed.follows(&edge(100)));
    }
}
