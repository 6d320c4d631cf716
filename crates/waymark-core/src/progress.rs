//! Per-user progress instances

use crate::conditions::SubscriptionTier;
use crate::ids::{MilestoneId, UserId};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a progress instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    /// Prerequisites not met, or waiting for an explicit unlock
    Locked,
    /// May be started
    Available,
    /// Being worked on
    InProgress,
    /// Finished; no further transition
    Completed,
    /// Last attempt failed; may be retried
    Failed,
}

impl MilestoneStatus {
    /// All states, in lifecycle order
    pub const ALL: [Self; 5] = [
        Self::Locked,
        Self::Available,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];

    /// Wire/database name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown milestone status: {s}"))
    }
}

/// One row per (user, milestone)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMilestone {
    /// Owning user
    pub user_id: UserId,
    /// Milestone this row tracks
    pub milestone_id: MilestoneId,
    /// Lifecycle state
    pub status: MilestoneStatus,
    /// 0 - 100
    pub completion_percentage: u8,
    /// Steps done
    pub current_step: u32,
    /// Steps in the current run
    pub total_steps: u32,
    /// Resumable state from the last update
    pub checkpoint_data: Option<serde_json::Value>,
    /// Result recorded on completion
    pub output_data: Option<serde_json::Value>,
    /// Score recorded on completion, 0.0 - 100.0
    pub quality_score: Option<f64>,
    /// When the row left LOCKED
    pub unlocked_at: Option<Timestamp>,
    /// Start of the current attempt
    pub started_at: Option<Timestamp>,
    /// Completion time
    pub completed_at: Option<Timestamp>,
    /// Last start or update; time accounting runs from here
    pub last_accessed_at: Option<Timestamp>,
    /// Active time across attempts
    pub time_spent_seconds: u64,
    /// Attempts started so far
    pub processing_attempts: u32,
    /// Message of the last failure
    pub last_error: Option<String>,
    /// Row version, bumped on every write; used for compare-and-set
    pub version: u64,
    /// Row creation time
    pub created_at: Timestamp,
    /// Last write time
    pub updated_at: Timestamp,
}

impl UserMilestone {
    /// Fresh instance in the given state
    #[must_use]
    pub fn new(
        user_id: UserId,
        milestone_id: MilestoneId,
        status: MilestoneStatus,
        now: Timestamp,
    ) -> Self {
        Self {
            user_id,
            milestone_id,
            status,
            completion_percentage: 0,
            current_step: 0,
            total_steps: 0,
            checkpoint_data: None,
            output_data: None,
            quality_score: None,
            unlocked_at: (status != MilestoneStatus::Locked).then_some(now),
            started_at: None,
            completed_at: None,
            last_accessed_at: None,
            time_spent_seconds: 0,
            processing_attempts: 0,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Completion used for threshold checks; a completed instance is always 100%
    #[must_use]
    pub fn effective_completion(&self) -> u8 {
        if self.status == MilestoneStatus::Completed {
            100
        } else {
            self.completion_percentage
        }
    }
}

/// Snapshot of user attributes read by conditional edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owning user
    pub user_id: UserId,
    /// Current tier, `None` if unknown
    #[serde(default)]
    pub subscription_tier: Option<SubscriptionTier>,
    /// Attributes read by custom predicates
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    /// Profile with no tier and no attributes
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            subscription_tier: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set subscription tier
    #[must_use]
    pub fn with_tier(mut self, tier: SubscriptionTier) -> Self {
        self.subscription_tier = Some(tier);
        self
    }

    /// Set one attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip() {
        for status in MilestoneStatus::ALL {
            assert_eq!(status.as_str().parse::<MilestoneStatus>().unwrap(), status);
        }
        assert!("paused".parse::<MilestoneStatus>().is_err());
    }

    #[test]
    fn completed_counts_as_full_completion() {
        let now = chrono::Utc::now();
        let mut row = UserMilestone::new(UserId::new(), MilestoneId(1), MilestoneStatus::InProgress, now);
        row.completion_percentage = 40;
        assert_eq!(row.effective_completion(), 40);
        row.status = MilestoneStatus::Completed;
        assert_eq!(row.effective_completion(), 100);
    }

    #[test]
    fn locked_rows_have_no_unlock_time() {
        let now = chrono::Utc::now();
        let locked = UserMilestone::new(UserId::new(), MilestoneId(1), MilestoneStatus::Locked, now);
        let open = UserMilestone::new(UserId::new(), MilestoneId(1), MilestoneStatus::Available, now);
        assert!(locked.unlocked_at.is_none());
        assert_eq!(open.unlocked_at, Some(now));
    }
}
