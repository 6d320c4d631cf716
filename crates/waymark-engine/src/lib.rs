//! Waymark Engine - dependency-aware milestone progress
//!
//! The engine governs a staged workflow in which each user moves through a
//! catalog of milestones linked by a dependency DAG:
//!
//! - [`validator`] / [`conditions`]: eligibility from graph edges, partial
//!   thresholds and conditional predicates
//! - [`progress`]: the lifecycle operations (start, update, complete, fail,
//!   unlock) checked against the transition table
//! - [`cascade`]: one-hop unlock of dependents after a completion
//! - [`engine::ProgressEngine`]: transactional facade with cache invalidation
//!
//! ```no_run
//! use waymark_engine::prelude::*;
//!
//! # fn main() -> Result<(), EngineError> {
//! let engine = ProgressEngine::new(MemoryStore::new(), EngineConfig::default());
//! let m0 = MilestoneCode::parse("M0")?;
//! let m1 = MilestoneCode::parse("M1")?;
//! engine.register_milestone(NewMilestone::new(m0.clone(), "Idea"))?;
//! engine.register_milestone(NewMilestone::new(m1.clone(), "Market"))?;
//! engine.add_dependency(&m1, &m0, DependencySpec::required())?;
//!
//! let user = UserId::new();
//! engine.start_milestone(user, &m0)?;
//! let done = engine.complete_milestone(user, &m0, None, Some(88.0))?;
//! assert_eq!(done.newly_unlocked, vec![m1]);
//! # Ok(())
//! # }
//! ```

pub mod cascade;
pub mod catalog;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod simulator;
pub mod tree;
pub mod validator;

pub use catalog::{Catalog, CatalogDependency, SeedReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, EngineConfig, PartialCompletionPolicy, RetryConfig};
pub use engine::{
    CompleteOutcome, FailOutcome, ProgressEngine, StartOutcome, UnlockOutcome, UpdateOutcome,
};
pub use error::{EngineError, Result};
pub use progress::ProgressUpdate;
pub use tree::{TreeNode, UserTree};
pub use validator::{UnmetDependency, UnmetReason, ValidationOutcome};

/// Common imports
pub mod prelude {
    pub use crate::{
        Catalog, CompleteOutcome, EngineConfig, EngineError, ManualClock, PartialCompletionPolicy,
        ProgressEngine, ProgressUpdate, StartOutcome, UnmetReason, UpdateOutcome, UserTree,
        ValidationOutcome,
    };
    pub use waymark_core::{
        CustomPredicate, DependencySpec, EdgeConditions, GraphError, MilestoneCode,
        MilestoneStatus, NewMilestone, SubscriptionTier, UserId, UserProfile,
    };
    pub use waymark_store::{MemoryStore, MilestoneStore, SqliteStore};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
