//! The cache backend capability.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheResult;

/// A key to bytes store holding encoded datasets.
///
/// Backends treat values as opaque blobs. Expiry and eviction are owned by
/// the backend. Callers are expected to treat any error as a miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// `false` only for [`NoCache`]; lets callers skip encoding entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes) -> CacheResult<()>;
}

/// Backend used when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl CacheBackend for NoCache {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<Bytes>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Bytes) -> CacheResult<()> {
        Ok(())
    }
}
