//! Backend used when caching is disabled

use crate::port::{CacheEntry, CacheError, CacheKey, EligibilityCache};
use waymark_core::UserId;

/// Cache that stores nothing; every lookup misses
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl EligibilityCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    fn set(&self, _key: CacheKey, _entry: CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate_user(&self, _user: UserId) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate_all(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
