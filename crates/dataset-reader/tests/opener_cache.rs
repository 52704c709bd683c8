//! Cache-aside behaviour of the opener: hits, write-through and fail-open.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dataset_cache::{
    CacheBackend, CacheError, CacheKey, CacheResult, DiskCache, MemcachedCache, RedisCache,
    RetryPolicy,
};
use dataset_reader::{CoordinateNormalizer, DatasetOpener, FilesystemProvider, ReaderConfig};
use grid_common::{Dataset, GroupIndex, OpenOptions};
use test_utils::{consolidate, sst_cube, write_zarr_v2, FakeMemcached, FakeMode};

/// A backend that is always down.
#[derive(Default)]
struct BrokenCache {
    gets: AtomicUsize,
    sets: AtomicUsize,
}

#[async_trait]
impl CacheBackend for BrokenCache {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "cache is down",
        )))
    }

    async fn set(&self, _key: &str, _value: Bytes) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Protocol("SERVER_ERROR out of memory".into()))
    }
}

fn write_store(root: &Path) -> String {
    let store = root.join("sst.zarr");
    write_zarr_v2(&store, None, &sst_cube()).unwrap();
    consolidate(&store).unwrap();
    store.to_str().unwrap().to_string()
}

fn opener(cache: Arc<dyn CacheBackend>) -> DatasetOpener {
    DatasetOpener::new(FilesystemProvider::new(ReaderConfig::default()), cache)
}

#[tokio::test]
async fn test_second_open_is_served_from_cache() {
    let data = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let locator = write_store(data.path());

    let disk = Arc::new(DiskCache::open(cache_dir.path(), 64 * 1024 * 1024).await.unwrap());
    let opener = opener(disk.clone());
    let opts = OpenOptions::default();

    let first = opener.open(&locator, &opts).await.unwrap();
    assert!(disk.contains(&locator).await);

    // The source is gone, so only the cache can answer.
    std::fs::remove_dir_all(&locator).unwrap();
    let second = opener.open(&locator, &opts).await.unwrap();

    let a = CoordinateNormalizer::normalize(&first, "sst", Some("2020-01-02"), None).unwrap();
    let b = CoordinateNormalizer::normalize(&second, "sst", Some("2020-01-02"), None).unwrap();
    assert_eq!(a, b);
    assert_eq!(disk.stats().await.hits, 1);
}

#[tokio::test]
async fn test_cache_key_includes_group() {
    let data = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let store = data.path().join("pyramid.zarr");
    write_zarr_v2(&store, Some("3"), &sst_cube()).unwrap();
    let locator = store.to_str().unwrap();

    let disk = Arc::new(DiskCache::open(cache_dir.path(), 64 * 1024 * 1024).await.unwrap());
    let opts = OpenOptions::default().with_group(Some(GroupIndex::new(3)));
    opener(disk.clone()).open(locator, &opts).await.unwrap();

    let key = CacheKey::new(locator, Some(GroupIndex::new(3)));
    assert_eq!(key.as_str(), format!("{}_3", locator));
    assert!(disk.contains(key.as_str()).await);
    assert!(!disk.contains(locator).await);
}

#[tokio::test]
async fn test_failing_backend_falls_through() {
    let data = tempfile::tempdir().unwrap();
    let locator = write_store(data.path());

    let broken = Arc::new(BrokenCache::default());
    let ds = opener(broken.clone())
        .open(&locator, &OpenOptions::default())
        .await
        .unwrap();

    assert_eq!(ds.data_vars.len(), 4);
    assert_eq!(broken.gets.load(Ordering::SeqCst), 1);
    assert_eq!(broken.sets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undecodable_entry_is_a_miss() {
    let data = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let locator = write_store(data.path());

    let disk = Arc::new(DiskCache::open(cache_dir.path(), 1024 * 1024).await.unwrap());
    disk.set(&locator, Bytes::from_static(b"not a dataset")).await.unwrap();

    let ds = opener(disk.clone())
        .open(&locator, &OpenOptions::default())
        .await
        .unwrap();
    assert_eq!(ds.data_vars.len(), 4);

    // The bad entry was replaced by a decodable one.
    let raw = disk.get(&locator).await.unwrap().unwrap();
    assert_eq!(Dataset::from_bytes(&raw).unwrap().data_vars.len(), 4);
}

#[tokio::test]
async fn test_unreachable_redis_fails_open() {
    let data = tempfile::tempdir().unwrap();
    let locator = write_store(data.path());

    let redis = Arc::new(RedisCache::new("redis://127.0.0.1:1/0", None).unwrap());
    let ds = opener(redis).open(&locator, &OpenOptions::default()).await.unwrap();
    assert_eq!(ds.data_vars.len(), 4);
}

#[tokio::test]
async fn test_memcached_round_trip_and_outage() {
    let data = tempfile::tempdir().unwrap();
    let locator = write_store(data.path());
    let policy = RetryPolicy {
        attempts: 2,
        delay: Duration::from_millis(5),
    };

    let server = FakeMemcached::start(FakeMode::Normal).await;
    let cache = Arc::new(MemcachedCache::new(server.addr(), policy, None));
    let opener_ok = opener(cache);
    let first = opener_ok.open(&locator, &OpenOptions::default()).await.unwrap();
    assert!(server.stored(&locator).await.is_some());
    let second = opener_ok.open(&locator, &OpenOptions::default()).await.unwrap();
    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());

    let down = FakeMemcached::start(FakeMode::DropAll).await;
    let cache = Arc::new(MemcachedCache::new(down.addr(), policy, None));
    let ds = opener(cache).open(&locator, &OpenOptions::default()).await.unwrap();
    assert_eq!(ds.data_vars.len(), 4);
}
