//! Engine error taxonomy

use crate::validator::UnmetDependency;
use waymark_core::{CodeError, GraphError, MilestoneCode, MilestoneStatus};
use waymark_store::StoreError;

/// Result alias used across the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Every way an engine operation can fail
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Graph mutation rejected before anything was written
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Required prerequisites are not satisfied
    #[error("dependencies not met for {milestone}: {}", list_unmet(.unmet))]
    DependenciesNotMet {
        /// Milestone concerned
        milestone: MilestoneCode,
        /// Blocking prerequisites
        unmet: Vec<UnmetDependency>,
    },

    /// An attempt on this milestone is already in progress
    #[error("milestone {0} is already in progress")]
    AlreadyStarted(MilestoneCode),

    /// Unknown milestone, or no progress where some was expected
    #[error("{0} not found")]
    NotFound(String),

    /// Transition missing from the lifecycle table
    #[error("{milestone}: illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Milestone concerned
        milestone: MilestoneCode,
        /// Current status
        from: MilestoneStatus,
        /// Requested status
        to: MilestoneStatus,
    },

    /// Milestone does not auto-unlock and has not been unlocked
    #[error("milestone {0} is locked until explicitly unlocked")]
    MilestoneLocked(MilestoneCode),

    /// Failed too many times to be retried
    #[error("milestone {milestone} failed {attempts} times; retry limit is {limit}")]
    RetryLimitExceeded {
        /// Milestone concerned
        milestone: MilestoneCode,
        /// Failed attempts so far
        attempts: u32,
        /// Configured retry limit
        limit: u32,
    },

    /// Step count or score out of range
    #[error("invalid progress update: {0}")]
    InvalidProgress(String),

    /// Malformed milestone code
    #[error(transparent)]
    InvalidCode(#[from] CodeError),

    /// Bad request that is not about progress or codes
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lost a race with another writer; the operation can be retried
    #[error("concurrent modification: {0}")]
    ConcurrencyConflict(String),

    /// Storage failure; fatal for this operation
    #[error("store: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Safe to retry the whole operation
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reason) => Self::ConcurrencyConflict(reason),
            StoreError::Graph(graph) => Self::Graph(graph),
            StoreError::UnknownMilestone(code) => Self::NotFound(format!("milestone {code}")),
            other => Self::Store(other),
        }
    }
}

fn list_unmet(unmet: &[UnmetDependency]) -> String {
    unmet
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
