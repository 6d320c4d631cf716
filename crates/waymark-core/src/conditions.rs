//! Structured edge conditions
//!
//! Conditions are plain tagged data so they can be persisted as JSON and
//! interpreted by a closed set of evaluators. Adding a predicate kind means
//! adding a variant here and an arm in the evaluator, nothing else.

use crate::ids::MilestoneCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tier, totally ordered `Free < Starter < Professional < Enterprise`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// No subscription
    Free,
    /// Entry paid tier
    Starter,
    /// Mid paid tier
    Professional,
    /// Top tier
    Enterprise,
}

impl SubscriptionTier {
    /// Wire/database name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown subscription tier: {other}")),
        }
    }
}

/// Minimum quality score recorded on some milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFloor {
    /// Milestone whose score is inspected (not necessarily the edge's prerequisite)
    pub milestone: MilestoneCode,
    /// Inclusive lower bound, 0.0 - 100.0
    pub min_score: f64,
}

/// Custom predicate over the user's attribute snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomPredicate {
    /// Attribute must equal the given JSON value
    AttributeEquals {
        /// Attribute name
        key: String,
        /// Expected value
        value: serde_json::Value,
    },
    /// Attribute must be numeric and at least `min`
    AttributeAtLeast {
        /// Attribute name
        key: String,
        /// Inclusive lower bound
        min: f64,
    },
    /// Attribute must exist and not be null
    AttributePresent {
        /// Attribute name
        key: String,
    },
    /// Attribute must equal one of `values`
    AttributeIn {
        /// Attribute name
        key: String,
        /// Accepted values
        values: Vec<serde_json::Value>,
    },
}

impl CustomPredicate {
    /// Attribute key the predicate reads
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::AttributeEquals { key, .. }
            | Self::AttributeAtLeast { key, .. }
            | Self::AttributePresent { key }
            | Self::AttributeIn { key, .. } => key,
        }
    }
}

/// Conjunction of conditions attached to a dependency edge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeConditions {
    /// Subscription tier floor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tier: Option<SubscriptionTier>,
    /// Quality score floor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<QualityFloor>,
    /// Custom predicates, all of which must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<CustomPredicate>,
}

impl EdgeConditions {
    /// No conditions at all
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Require a subscription tier
    #[must_use]
    pub fn with_min_tier(mut self, tier: SubscriptionTier) -> Self {
        self.min_tier = Some(tier);
        self
    }

    /// Require a quality score on a milestone
    #[must_use]
    pub fn with_min_quality(mut self, milestone: MilestoneCode, min_score: f64) -> Self {
        self.min_quality = Some(QualityFloor {
            milestone,
            min_score,
        });
        self
    }

    /// Add a custom predicate
    #[must_use]
    pub fn with_predicate(mut self, predicate: CustomPredicate) -> Self {
        self.custom.push(predicate);
        self
    }

    /// True when nothing would be evaluated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min_tier.is_none() && self.min_quality.is_none() && self.custom.is_empty()
    }
}
