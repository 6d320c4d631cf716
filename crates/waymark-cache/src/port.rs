//! Cache port and the values that cross it

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use waymark_core::{MilestoneId, UserId};

/// Cache backend failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Backend could not be reached; worth retrying
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the operation; retrying will not help
    #[error("cache rejected operation: {0}")]
    Rejected(String),
}

impl CacheError {
    /// Transient failures are retried with backoff
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// What a cached value describes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Full milestone tree of one user
    UserTree(UserId),
    /// Validation outcome of one (user, milestone) pair
    Eligibility {
        /// User the outcome belongs to
        user: UserId,
        /// Milestone being validated
        milestone: MilestoneId,
        /// Whether edge conditions were evaluated
        conditions: bool,
    },
    /// Transitive prerequisites of a milestone; shared by all users
    DependencyChain {
        /// Milestone whose chain is cached
        milestone: MilestoneId,
        /// Whether optional edges were followed
        include_optional: bool,
    },
}

impl CacheKey {
    /// Owning user, `None` for graph-wide entries
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::UserTree(user) | Self::Eligibility { user, .. } => Some(*user),
            Self::DependencyChain { .. } => None,
        }
    }
}

/// Store commit counters a value was computed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stamp {
    /// Catalog and edge counter
    pub global: u64,
    /// Counter of the owning user, 0 for graph-wide keys
    pub user: u64,
}

/// Stored value plus the stamp it was computed under
#[derive(Clone)]
pub struct CacheEntry {
    /// Counters read in the snapshot the value was computed from
    pub stamp: Stamp,
    /// Type-erased value
    pub value: Arc<dyn Any + Send + Sync>,
}

impl CacheEntry {
    /// Wrap a value
    pub fn new<T: Any + Send + Sync>(stamp: Stamp, value: T) -> Self {
        Self {
            stamp,
            value: Arc::new(value),
        }
    }

    /// Typed view of the value, `None` on a type mismatch
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

/// Injected cache backend.
///
/// Every operation may fail; callers treat the cache as best-effort and
/// never rely on it for correctness.
pub trait EligibilityCache: Send + Sync {
    /// Look up an entry
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing any previous one
    fn set(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    /// Drop every entry owned by `user`
    fn invalidate_user(&self, user: UserId) -> Result<(), CacheError>;

    /// Drop everything
    fn invalidate_all(&self) -> Result<(), CacheError>;
}
