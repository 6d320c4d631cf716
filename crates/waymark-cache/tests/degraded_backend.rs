//! Behaviour of the cache layer when its backend misbehaves

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use waymark_cache::{
    CacheEntry, CacheError, CacheKey, CacheLayer, EligibilityCache, MokaCache, RetryPolicy, Stamp,
};
use waymark_core::{MilestoneId, UserId};

/// Fails the first `failures` calls of every operation, then delegates
struct FlakyCache {
    inner: MokaCache,
    failures: u32,
    calls: AtomicU32,
    per_user_broken: bool,
    clears: AtomicU32,
}

impl FlakyCache {
    fn new(failures: u32) -> Self {
        Self {
            inner: MokaCache::new(100, Duration::from_secs(60)),
            failures,
            calls: AtomicU32::new(0),
            per_user_broken: false,
            clears: AtomicU32::new(0),
        }
    }

    fn trip(&self) -> Result<(), CacheError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(CacheError::Unavailable("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

impl EligibilityCache for FlakyCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        self.trip()?;
        self.inner.get(key)
    }

    fn set(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.trip()?;
        self.inner.set(key, entry)
    }

    fn invalidate_user(&self, user: UserId) -> Result<(), CacheError> {
        if self.per_user_broken {
            return Err(CacheError::Rejected("predicates disabled".into()));
        }
        self.trip()?;
        self.inner.invalidate_user(user)
    }

    fn invalidate_all(&self) -> Result<(), CacheError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_all()
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

fn key(user: UserId) -> CacheKey {
    CacheKey::Eligibility {
        user,
        milestone: MilestoneId(1),
        conditions: true,
    }
}

#[test]
fn transient_failures_are_absorbed_by_retry() {
    let backend = Arc::new(FlakyCache::new(2));
    let layer = CacheLayer::new(backend, fast_retry(3));
    let user = UserId::new();

    let stamp = Stamp { global: 1, user: 1 };
    layer.put(key(user), stamp, 9_u32);
    assert_eq!(layer.get::<u32>(&key(user), stamp), Some(9));
}

#[test]
fn exhausted_reads_degrade_to_recompute() {
    let backend = Arc::new(FlakyCache::new(u32::MAX));
    let layer = CacheLayer::new(backend, fast_retry(2));
    let mut computed = 0;
    let value: Result<&str, ()> =
        layer.get_or_try_compute(key(UserId::new()), Stamp::default(), || {
            computed += 1;
            Ok("fresh")
        });
    assert_eq!(value, Ok("fresh"));
    assert_eq!(computed, 1);
}

#[test]
fn refused_user_invalidation_escalates_to_full_clear() {
    let mut flaky = FlakyCache::new(0);
    flaky.per_user_broken = true;
    let backend = Arc::new(flaky);
    let layer = CacheLayer::new(backend.clone(), fast_retry(3));
    let user = UserId::new();

    layer.put(key(user), Stamp::default(), 1_u8);
    layer.invalidate_user(user);

    assert_eq!(backend.clears.load(Ordering::SeqCst), 1);
    assert_eq!(layer.get::<u8>(&key(user), Stamp::default()), None);
}
