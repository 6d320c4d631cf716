//! Domain-level errors shared by every crate in the workspace

use crate::ids::MilestoneCode;
use crate::progress::MilestoneStatus;

/// Malformed milestone code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid milestone code {0:?}: expected M followed by digits")]
pub struct CodeError(pub String);

/// Graph mutation rejected before anything was written
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Edge from a milestone to itself
    #[error("milestone {0} cannot depend on itself")]
    SelfReference(MilestoneCode),

    /// Edge would close a cycle; `path` starts and ends at the same milestone
    #[error("dependency would create a cycle: {}", format_path(.path))]
    Cycle {
        /// Closing path, e.g. `[M0, M2, M1, M0]`
        path: Vec<MilestoneCode>,
    },

    /// Edge already present
    #[error("{milestone} already depends on {dependency}")]
    DuplicateEdge {
        /// Dependent side of the edge
        milestone: MilestoneCode,
        /// Prerequisite side of the edge
        dependency: MilestoneCode,
    },

    /// Minimum completion outside 0..=100
    #[error("minimum completion percentage {0} is outside 0..=100")]
    InvalidThreshold(u8),
}

/// Transition not present in the lifecycle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state
    pub from: MilestoneStatus,
    /// Requested state
    pub to: MilestoneStatus,
}

fn format_path(path: &[MilestoneCode]) -> String {
    path.iter()
        .map(MilestoneCode::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let path = ["M0", "M1", "M0"]
            .iter()
            .map(|c| MilestoneCode::parse(c).unwrap())
            .collect();
        let err = GraphError::Cycle { path };
        assert_eq!(err.to_string(), "dependency would create a cycle: M0 -> M1 -> M0");
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = TransitionError {
            from: MilestoneStatus::Completed,
            to: MilestoneStatus::InProgress,
        };
        assert_eq!(err.to_string(), "illegal transition completed -> in_progress");
    }
}
