//! Version-guarded cache layer
//!
//! Callers read the store's commit counters in the same transaction that
//! computes a value and pass them in as the [`Stamp`]. An entry is served
//! only while its stamp equals the counters the caller currently sees, so a
//! write committed by any process sharing the store retires every value
//! computed before it, even if no invalidation ever reaches this cache.
//! Invalidation only frees memory early.

use crate::port::{CacheEntry, CacheKey, EligibilityCache, Stamp};
use crate::retry::RetryPolicy;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use waymark_core::UserId;

/// Hit / miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Lookups that found an entry computed under older counters
    pub stale: u64,
}

/// Best-effort cache in front of the engine's read paths
pub struct CacheLayer {
    port: Arc<dyn EligibilityCache>,
    retry: RetryPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("retry", &self.retry)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CacheLayer {
    /// Wrap a backend
    pub fn new(port: Arc<dyn EligibilityCache>, retry: RetryPolicy) -> Self {
        Self {
            port,
            retry,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Value for `key` if one was computed under `current`.
    ///
    /// Backend failures degrade to a miss.
    pub fn get<T: Any + Clone>(&self, key: &CacheKey, current: Stamp) -> Option<T> {
        let entry = match self.retry.run("get", || self.port.get(key)) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(?key, error = %err, "cache read failed, treating as miss");
                None
            }
        };

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?key, "cache miss");
            return None;
        };

        if entry.stamp != current {
            self.stale.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?key, cached = ?entry.stamp, ?current, "stale cache entry ignored");
            return None;
        }

        let value = entry.downcast::<T>();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store `value` under the counters it was computed from.
    ///
    /// Backend failures are logged and skipped.
    pub fn put<T: Any + Send + Sync>(&self, key: CacheKey, stamp: Stamp, value: T) {
        let entry = CacheEntry::new(stamp, value);
        if let Err(err) = self
            .retry
            .run("set", || self.port.set(key.clone(), entry.clone()))
        {
            tracing::warn!(?key, error = %err, "cache write failed, skipping");
        }
    }

    /// Return the value cached under `current` or compute, store and return it.
    ///
    /// `current` must come from the snapshot `compute` reads.
    pub fn get_or_try_compute<T, E, F>(
        &self,
        key: CacheKey,
        current: Stamp,
        compute: F,
    ) -> Result<T, E>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get::<T>(&key, current) {
            return Ok(hit);
        }
        let value = compute()?;
        self.put(key, current, value.clone());
        Ok(value)
    }

    /// Drop every entry of `user` after a committed write.
    ///
    /// If the backend refuses, everything is dropped instead.
    pub fn invalidate_user(&self, user: UserId) {
        let Err(err) = self
            .retry
            .run("invalidate_user", || self.port.invalidate_user(user))
        else {
            return;
        };
        tracing::warn!(%user, error = %err, "per-user invalidation failed, clearing the whole cache");
        self.invalidate_all();
    }

    /// Drop every entry after a committed graph mutation
    pub fn invalidate_all(&self) {
        if let Err(err) = self
            .retry
            .run("invalidate_all", || self.port.invalidate_all())
        {
            tracing::warn!(error = %err, "cache clear failed; stale entries are masked by version");
        }
    }

    /// Counters since construction
    #[must_use]
    pub fn stats(&self) -> LayerStats {
        LayerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moka_cache::MokaCache;
    use crate::noop::NoopCache;
    use std::time::Duration;
    use waymark_core::MilestoneId;

    fn layer() -> CacheLayer {
        CacheLayer::new(
            Arc::new(MokaCache::new(1_000, Duration::from_secs(60))),
            RetryPolicy::none(),
        )
    }

    fn eligibility(user: UserId) -> CacheKey {
        CacheKey::Eligibility {
            user,
            milestone: MilestoneId(2),
            conditions: false,
        }
    }

    fn stamp(global: u64, user: u64) -> Stamp {
        Stamp { global, user }
    }

    #[test]
    fn computes_once_then_hits() {
        let layer = layer();
        let user = UserId::new();
        let mut calls = 0;
        for _ in 0..3 {
            let value: Result<u32, ()> =
                layer.get_or_try_compute(eligibility(user), stamp(1, 1), || {
                    calls += 1;
                    Ok(42)
                });
            assert_eq!(value, Ok(42));
        }
        assert_eq!(calls, 1);
        assert_eq!(layer.stats().hits, 2);
    }

    #[test]
    fn moved_user_counter_hides_entry_without_invalidation() {
        let layer = layer();
        let key = eligibility(UserId::new());
        layer.put(key.clone(), stamp(3, 7), false);

        assert_eq!(layer.get::<bool>(&key, stamp(3, 7)), Some(false));
        assert_eq!(layer.get::<bool>(&key, stamp(3, 8)), None);
        assert_eq!(layer.stats().stale, 1);
    }

    #[test]
    fn moved_graph_counter_hides_entry() {
        let layer = layer();
        let key = CacheKey::DependencyChain {
            milestone: MilestoneId(4),
            include_optional: false,
        };
        layer.put(key.clone(), stamp(1, 0), vec![MilestoneId(1)]);
        assert_eq!(layer.get::<Vec<MilestoneId>>(&key, stamp(2, 0)), None);
    }

    #[test]
    fn recompute_replaces_stale_entry() {
        let layer = layer();
        let key = eligibility(UserId::new());
        let first: Result<bool, ()> =
            layer.get_or_try_compute(key.clone(), stamp(0, 1), || Ok(false));
        let second: Result<bool, ()> =
            layer.get_or_try_compute(key.clone(), stamp(0, 2), || Ok(true));
        assert_eq!((first, second), (Ok(false), Ok(true)));
        assert_eq!(layer.get::<bool>(&key, stamp(0, 2)), Some(true));
    }

    #[test]
    fn other_users_are_untouched() {
        let layer = layer();
        let alice = UserId::new();
        let bob = UserId::new();
        let bob_key = eligibility(bob);
        layer.put(bob_key.clone(), stamp(0, 1), 5_u8);

        layer.invalidate_user(alice);
        assert_eq!(layer.get::<u8>(&bob_key, stamp(0, 1)), Some(5));
    }

    #[test]
    fn errors_from_compute_are_not_cached() {
        let layer = layer();
        let key = eligibility(UserId::new());
        let first: Result<u8, &str> =
            layer.get_or_try_compute(key.clone(), stamp(0, 0), || Err("boom"));
        assert_eq!(first, Err("boom"));
        let second: Result<u8, &str> = layer.get_or_try_compute(key, stamp(0, 0), || Ok(1));
        assert_eq!(second, Ok(1));
    }

    #[test]
    fn noop_backend_always_recomputes() {
        let layer = CacheLayer::new(Arc::new(NoopCache), RetryPolicy::none());
        let key = eligibility(UserId::new());
        let mut calls = 0;
        for _ in 0..2 {
            let _: Result<u8, ()> = layer.get_or_try_compute(key.clone(), stamp(0, 0), || {
                calls += 1;
                Ok(0)
            });
        }
        assert_eq!(calls, 2);
    }
}
