//! Dependency validator
//!
//! Decides whether a user may work on a milestone by walking its
//! prerequisite edges. A missing progress row counts as 0% and a completed
//! one as 100%. Optional edges never block; they are reported separately.

use crate::conditions::{ConditionEvaluator, ConditionFailure};
use crate::config::PartialCompletionPolicy;
use serde::Serialize;
use std::fmt;
use waymark_core::{Milestone, MilestoneCode, UserId};
use waymark_store::{StoreError, StoreTx};

/// Why a prerequisite is not satisfied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnmetReason {
    /// Completion below the edge threshold
    Incomplete {
        /// Edge threshold in percent
        required: u8,
        /// User's completion in percent
        actual: u8,
    },
    /// Completion is enough but an edge condition failed
    ConditionFailed {
        /// Every condition that did not hold
        failures: Vec<ConditionFailure>,
    },
}

/// Prerequisite that blocks a milestone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmetDependency {
    /// Blocking prerequisite
    pub milestone: MilestoneCode,
    /// Why it blocks
    pub reason: UnmetReason,
}

impl fmt::Display for UnmetDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            UnmetReason::Incomplete { required, actual } => {
                write!(f, "{} ({actual}% of {required}%)", self.milestone)
            }
            UnmetReason::ConditionFailed { failures } => {
                let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
                write!(f, "{} ({})", self.milestone, reasons.join("; "))
            }
        }
    }
}

/// Result of validating one (user, milestone) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    /// Milestone that was validated
    pub milestone: MilestoneCode,
    /// Every required prerequisite is satisfied
    pub met: bool,
    /// Required prerequisites still blocking
    pub unmet: Vec<UnmetDependency>,
    /// Optional prerequisites still below their threshold
    pub optional_pending: Vec<MilestoneCode>,
}

impl ValidationOutcome {
    /// Codes of the blocking prerequisites
    #[must_use]
    pub fn unmet_codes(&self) -> Vec<MilestoneCode> {
        self.unmet.iter().map(|u| u.milestone.clone()).collect()
    }
}

/// Graph-plus-conditions eligibility check
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyValidator {
    conditions: ConditionEvaluator,
}

impl DependencyValidator {
    /// Validator applying `policy` to quality floors
    #[must_use]
    pub fn new(policy: PartialCompletionPolicy) -> Self {
        Self {
            conditions: ConditionEvaluator::new(policy),
        }
    }

    /// Validate `milestone` for `user`.
    ///
    /// Edge conditions are evaluated only when `check_conditions` is set.
    pub fn validate(
        &self,
        tx: &dyn StoreTx,
        user: UserId,
        milestone: &Milestone,
        check_conditions: bool,
    ) -> Result<ValidationOutcome, StoreError> {
        let mut prerequisites = Vec::new();
        for edge in tx.edges_into(milestone.id)? {
            let dependency = tx
                .milestone(edge.dependency_id)?
                .ok_or_else(|| StoreError::UnknownMilestone(edge.dependency_id.to_string()))?;
            prerequisites.push((dependency, edge));
        }
        prerequisites.sort_by_key(|(dependency, _)| (dependency.order_index, dependency.id));

        let mut unmet = Vec::new();
        let mut optional_pending = Vec::new();
        for (dependency, edge) in prerequisites {
            let actual = tx
                .progress(user, dependency.id)?
                .map_or(0, |row| row.effective_completion());
            let required = edge.minimum_completion_percentage;

            if !edge.is_required {
                if actual < required {
                    optional_pending.push(dependency.code);
                }
                continue;
            }

            if actual < required {
                unmet.push(UnmetDependency {
                    milestone: dependency.code,
                    reason: UnmetReason::Incomplete { required, actual },
                });
                continue;
            }

            if let Some(conditions) = edge.active_conditions().filter(|_| check_conditions) {
                let failures = self.conditions.evaluate(tx, user, conditions)?;
                if !failures.is_empty() {
                    unmet.push(UnmetDependency {
                        milestone: dependency.code,
                        reason: UnmetReason::ConditionFailed { failures },
                    });
                }
            }
        }

        tracing::debug!(
            %user,
            milestone = %milestone.code,
            unmet = unmet.len(),
            optional_pending = optional_pending.len(),
            "dependencies validated"
        );

        Ok(ValidationOutcome {
            milestone: milestone.code.clone(),
            met: unmet.is_empty(),
            unmet,
            optional_pending,
        })
    }
}
