//! Progress lifecycle table
//!
//! ```text
//! LOCKED -> AVAILABLE -> IN_PROGRESS -> COMPLETED
//!               |             |   ^
//!               +--> FAILED <-+   |
//!                      +----------+  (retry)
//! ```
//!
//! `IN_PROGRESS -> IN_PROGRESS` is the step-update self loop.

use crate::error::TransitionError;
use crate::progress::MilestoneStatus;

/// Validates a state transition.
///
/// # Errors
/// Returns [`TransitionError`] when `to` is not reachable from `from` in one step.
pub fn validate_transition(
    from: MilestoneStatus,
    to: MilestoneStatus,
) -> Result<(), TransitionError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: MilestoneStatus) -> Vec<MilestoneStatus> {
    use MilestoneStatus::*;
    match from {
        Locked => vec![Available],
        Available => vec![InProgress, Failed],
        InProgress => vec![InProgress, Completed, Failed],
        Failed => vec![InProgress],
        Completed => vec![],
    }
}

fn allowed(from: MilestoneStatus, to: MilestoneStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
