//! Waymark Cache - best-effort caching of eligibility and trees
//!
//! - [`EligibilityCache`]: the injected backend port
//! - [`MokaCache`] / [`NoopCache`]: in-process and disabled backends
//! - [`RetryPolicy`]: backoff for transient backend failures
//! - [`CacheLayer`]: version guard that keeps stale values from being served
//!
//! Correctness never depends on the cache: every read path can recompute
//! from the store, and every failure degrades to a miss.

pub mod layer;
pub mod moka_cache;
pub mod noop;
pub mod port;
pub mod retry;

pub use layer::{CacheLayer, LayerStats};
pub use moka_cache::MokaCache;
pub use noop::NoopCache;
pub use port::{CacheEntry, CacheError, CacheKey, EligibilityCache, Stamp};
pub use retry::RetryPolicy;
