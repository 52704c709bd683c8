//! Cache tiers for opened datasets.
//!
//! Provides:
//! - [`CacheKey`] derivation from a locator and group
//! - the [`CacheBackend`] capability shared by every tier
//! - [`NoCache`], [`DiskCache`] (bounded, least-frequently-used),
//!   [`RedisCache`] and [`MemcachedCache`] implementations
//! - [`CacheConfig`] and [`build_cache_backend`] for startup wiring

pub mod backend;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod key;
pub mod memcached;
pub mod redis_cache;

pub use backend::{CacheBackend, NoCache};
pub use config::{build_cache_backend, CacheBackendKind, CacheConfig};
pub use disk_cache::{DiskCache, DiskCacheStats};
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use memcached::{MemcachedCache, RetryPolicy};
pub use redis_cache::RedisCache;
