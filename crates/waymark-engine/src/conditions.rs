//! Conditional evaluator
//!
//! Interprets [`EdgeConditions`] against the user's profile and recorded
//! scores. Every condition on an edge must hold, and anything needed for a
//! decision that cannot be found counts as a failure.

use crate::config::PartialCompletionPolicy;
use serde::Serialize;
use std::fmt;
use waymark_core::{
    CustomPredicate, EdgeConditions, MilestoneCode, MilestoneStatus, QualityFloor,
    SubscriptionTier, UserId, UserProfile,
};
use waymark_store::{StoreError, StoreTx};

/// One condition that did not hold
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionFailure {
    /// Subscription tier below the floor, or no tier on record
    TierBelow {
        /// Minimum tier
        required: SubscriptionTier,
        /// Tier on record
        actual: Option<SubscriptionTier>,
    },
    /// Quality score below the floor, or no qualifying score on record
    QualityBelow {
        /// Milestone whose score is checked
        milestone: MilestoneCode,
        /// Minimum score
        required: f64,
        /// Best qualifying score on record
        actual: Option<f64>,
    },
    /// Custom predicate false or its attribute missing
    PredicateFailed {
        /// The predicate that evaluated false
        predicate: CustomPredicate,
    },
}

impl fmt::Display for ConditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TierBelow { required, actual } => match actual {
                Some(actual) => write!(f, "tier {actual} below {required}"),
                None => write!(f, "no subscription tier, {required} required"),
            },
            Self::QualityBelow {
                milestone,
                required,
                actual,
            } => match actual {
                Some(actual) => write!(f, "{milestone} quality {actual} below {required}"),
                None => write!(f, "no qualifying {milestone} quality score, {required} required"),
            },
            Self::PredicateFailed { predicate } => {
                write!(f, "attribute {} does not satisfy predicate", predicate.key())
            }
        }
    }
}

/// Evaluates edge conditions for one user
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator {
    policy: PartialCompletionPolicy,
}

impl ConditionEvaluator {
    /// Evaluator applying `policy` to quality floors
    #[must_use]
    pub fn new(policy: PartialCompletionPolicy) -> Self {
        Self { policy }
    }

    /// Failed conditions; empty means the edge's conditions hold
    pub fn evaluate(
        &self,
        tx: &dyn StoreTx,
        user: UserId,
        conditions: &EdgeConditions,
    ) -> Result<Vec<ConditionFailure>, StoreError> {
        let mut failures = Vec::new();
        if conditions.is_empty() {
            return Ok(failures);
        }

        let profile = tx.profile(user)?;

        if let Some(required) = conditions.min_tier {
            let actual = profile.as_ref().and_then(|p| p.subscription_tier);
            if actual.map_or(true, |tier| tier < required) {
                failures.push(ConditionFailure::TierBelow { required, actual });
            }
        }

        if let Some(floor) = &conditions.min_quality {
            let actual = self.qualifying_score(tx, user, floor)?;
            if actual.map_or(true, |score| score < floor.min_score) {
                failures.push(ConditionFailure::QualityBelow {
                    milestone: floor.milestone.clone(),
                    required: floor.min_score,
                    actual,
                });
            }
        }

        for predicate in &conditions.custom {
            if !predicate_holds(profile.as_ref(), predicate) {
                failures.push(ConditionFailure::PredicateFailed {
                    predicate: predicate.clone(),
                });
            }
        }

        Ok(failures)
    }

    fn qualifying_score(
        &self,
        tx: &dyn StoreTx,
        user: UserId,
        floor: &QualityFloor,
    ) -> Result<Option<f64>, StoreError> {
        let Some(milestone) = tx.milestone_by_code(&floor.milestone)? else {
            return Ok(None);
        };
        let Some(row) = tx.progress(user, milestone.id)? else {
            return Ok(None);
        };
        let counts = match self.policy {
            PartialCompletionPolicy::Strict => row.status == MilestoneStatus::Completed,
            PartialCompletionPolicy::Lenient => true,
        };
        Ok(row.quality_score.filter(|_| counts))
    }
}

fn predicate_holds(profile: Option<&UserProfile>, predicate: &CustomPredicate) -> bool {
    let Some(value) = profile
        .and_then(|p| p.attributes.get(predicate.key()))
        .filter(|v| !v.is_null())
    else {
        return false;
    };

    match predicate {
        CustomPredicate::AttributeEquals { value: expected, .. } => value == expected,
        CustomPredicate::AttributeAtLeast { min, .. } => {
            value.as_f64().is_some_and(|actual| actual >= *min)
        }
        CustomPredicate::AttributePresent { .. } => true,
        CustomPredicate::AttributeIn { values, .. } => values.contains(value),
    }
}
