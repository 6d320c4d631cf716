//! Waymark Core - domain model of the milestone progress engine
//!
//! - [`Milestone`] / [`MilestoneDependency`]: the catalog and its dependency DAG
//! - [`UserMilestone`]: per-user progress instance
//! - [`state_machine`]: the legal lifecycle transitions
//! - [`GraphError`] / [`TransitionError`]: domain-level failures

pub mod conditions;
pub mod error;
pub mod ids;
pub mod milestone;
pub mod progress;
pub mod state_machine;

pub use conditions::{CustomPredicate, EdgeConditions, QualityFloor, SubscriptionTier};
pub use error::{CodeError, GraphError, TransitionError};
pub use ids::{MilestoneCode, MilestoneId, UserId};
pub use milestone::{DependencySpec, Milestone, MilestoneDependency, MilestoneType, NewMilestone};
pub use progress::{MilestoneStatus, UserMilestone, UserProfile};

/// Timestamp type used throughout the engine
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
