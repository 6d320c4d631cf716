//! In-process cache backed by moka

use crate::port::{CacheEntry, CacheError, CacheKey, EligibilityCache};
use moka::sync::Cache;
use std::time::Duration;
use waymark_core::UserId;

/// Bounded TTL cache.
///
/// Per-user invalidation uses moka's invalidation closures, which are
/// applied lazily; the version guard in [`crate::CacheLayer`] hides any entry
/// that survives until the closure runs.
#[derive(Debug, Clone)]
pub struct MokaCache {
    inner: Cache<CacheKey, CacheEntry>,
}

impl MokaCache {
    /// Create cache with capacity and time-to-live
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }
}

impl EligibilityCache for MokaCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.inner.get(key))
    }

    fn set(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.inner.insert(key, entry);
        Ok(())
    }

    fn invalidate_user(&self, user: UserId) -> Result<(), CacheError> {
        self.inner
            .invalidate_entries_if(move |key, _| key.user() == Some(user))
            .map(|_| ())
            .map_err(|e| CacheError::Rejected(e.to_string()))
    }

    fn invalidate_all(&self) -> Result<(), CacheError> {
        self.inner.invalidate_all();
        Ok(())
    }
}
