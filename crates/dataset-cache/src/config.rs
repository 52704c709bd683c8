//! Cache tier configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{CacheBackend, NoCache};
use crate::disk_cache::DiskCache;
use crate::error::{CacheError, CacheResult};
use crate::memcached::{MemcachedCache, RetryPolicy};
use crate::redis_cache::RedisCache;

/// Shared-volume location used for the disk cache when it is mounted.
const SHARED_DISKCACHE_DIR: &str = "/mnt/efs/diskcache";

/// Which cache tier a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    #[default]
    None,
    Disk,
    Redis,
    Memcached,
}

impl CacheBackendKind {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" | "disabled" => Ok(Self::None),
            "disk" | "diskcache" => Ok(Self::Disk),
            "redis" => Ok(Self::Redis),
            "memcached" | "memcache" => Ok(Self::Memcached),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Disk => "disk",
            Self::Redis => "redis",
            Self::Memcached => "memcached",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Self::Memcached => 11211,
            _ => 6379,
        }
    }
}

impl std::fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for the dataset cache tier.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,

    /// Host of the remote key-value store.
    pub host: String,

    /// Port of the remote key-value store; defaults per backend.
    pub port: Option<u16>,

    /// Expiry for remote entries. `None` keeps entries until evicted.
    pub ttl: Option<Duration>,

    pub disk_directory: PathBuf,

    pub disk_size_limit_mb: u64,

    pub memcached_retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::None,
            host: "127.0.0.1".to_string(),
            port: None,
            ttl: None,
            disk_directory: default_disk_directory(),
            disk_size_limit_mb: 1024,
            memcached_retry: RetryPolicy::default(),
        }
    }
}

fn default_disk_directory() -> PathBuf {
    let shared = Path::new(SHARED_DISKCACHE_DIR);
    if shared.is_dir() {
        shared.to_path_buf()
    } else {
        PathBuf::from("diskcache")
    }
}

impl CacheConfig {
    /// Load configuration from environment variables.
    ///
    /// An unrecognised `DATASET_CACHE_BACKEND` is an error rather than a
    /// silent fallback, since it would otherwise disable caching unnoticed.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATASET_CACHE_BACKEND") {
            config.backend = CacheBackendKind::parse(&val)?;
        }

        if let Ok(val) = std::env::var("DATASET_CACHE_HOST") {
            config.host = val;
        }

        if let Ok(val) = std::env::var("DATASET_CACHE_PORT") {
            if let Ok(port) = val.parse() {
                config.port = Some(port);
            }
        }

        if let Ok(val) = std::env::var("DATASET_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.ttl = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }

        if let Ok(val) = std::env::var("DATASET_DISKCACHE_DIRECTORY") {
            config.disk_directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DATASET_DISKCACHE_SIZE_LIMIT_MB") {
            if let Ok(size) = val.parse() {
                config.disk_size_limit_mb = size;
            }
        }

        if let Ok(val) = std::env::var("DATASET_MEMCACHED_RETRY_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.memcached_retry.attempts = attempts;
            }
        }

        if let Ok(val) = std::env::var("DATASET_MEMCACHED_RETRY_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.memcached_retry.delay = Duration::from_millis(ms);
            }
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            CacheBackendKind::Redis | CacheBackendKind::Memcached if self.host.is_empty() => {
                Err(format!("{} cache requires a host", self.backend))
            }
            CacheBackendKind::Disk if self.disk_size_limit_mb == 0 => {
                Err("disk_size_limit_mb must be > 0".to_string())
            }
            CacheBackendKind::Memcached if self.memcached_retry.attempts == 0 => {
                Err("memcached retry attempts must be >= 1".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.backend.default_port())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/0", self.host, self.port())
    }

    pub fn memcached_addr(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    pub fn disk_size_limit_bytes(&self) -> u64 {
        self.disk_size_limit_mb * 1024 * 1024
    }
}

/// Construct the configured backend.
///
/// Called once by the process entry point; the result is shared with every
/// opener. Remote backends connect lazily, so this does not touch the network.
pub async fn build_cache_backend(config: &CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
    config.validate().map_err(CacheError::Config)?;

    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::None => Arc::new(NoCache),
        CacheBackendKind::Disk => Arc::new(
            DiskCache::open(&config.disk_directory, config.disk_size_limit_bytes()).await?,
        ),
        CacheBackendKind::Redis => Arc::new(RedisCache::new(&config.redis_url(), config.ttl)?),
        CacheBackendKind::Memcached => Arc::new(MemcachedCache::new(
            config.memcached_addr(),
            config.memcached_retry,
            config.ttl,
        )),
    };

    info!(
        backend = backend.name(),
        host = %config.host,
        port = config.port(),
        "Dataset cache backend ready"
    );

    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(CacheBackendKind::parse("none").unwrap(), CacheBackendKind::None);
        assert_eq!(CacheBackendKind::parse("Disk").unwrap(), CacheBackendKind::Disk);
        assert_eq!(CacheBackendKind::parse("REDIS").unwrap(), CacheBackendKind::Redis);
        assert_eq!(
            CacheBackendKind::parse("memcached").unwrap(),
            CacheBackendKind::Memcached
        );
        assert!(CacheBackendKind::parse("mongo").is_err());
    }

    #[test]
    fn test_default_ports() {
        let mut config = CacheConfig {
            backend: CacheBackendKind::Redis,
            ..Default::default()
        };
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");

        config.backend = CacheBackendKind::Memcached;
        assert_eq!(config.memcached_addr(), "127.0.0.1:11211");

        config.port = Some(22122);
        assert_eq!(config.memcached_addr(), "127.0.0.1:22122");
    }

    #[test]
    fn test_config_validation() {
        let mut config = CacheConfig::default();
        assert!(config.validate().is_ok());

        config.backend = CacheBackendKind::Redis;
        config.host.clear();
        assert!(config.validate().is_err());

        config = CacheConfig {
            backend: CacheBackendKind::Disk,
            disk_size_limit_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Disk,
            disk_directory: dir.path().join("cache"),
            disk_size_limit_mb: 1,
            ..Default::default()
        };
        let backend = build_cache_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "disk");
        assert!(dir.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn test_build_none_backend() {
        let backend = build_cache_backend(&CacheConfig::default()).await.unwrap();
        assert!(!backend.is_enabled());
    }
}
