//! Memcached client behaviour against an in-process server.

use bytes::Bytes;
use dataset_cache::{CacheBackend, CacheError, MemcachedCache, RetryPolicy};
use std::time::Duration;
use test_utils::{FakeMemcached, FakeMode};

fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_set_then_get_reuses_connection() {
    let server = FakeMemcached::start(FakeMode::Normal).await;
    let cache = MemcachedCache::new(server.addr(), policy(2), None);

    assert!(cache.get("sst.zarr").await.unwrap().is_none());
    cache.set("sst.zarr", Bytes::from_static(b"\x00GRDS\r\nbody")).await.unwrap();
    assert_eq!(
        cache.get("sst.zarr").await.unwrap(),
        Some(Bytes::from_static(b"\x00GRDS\r\nbody"))
    );
    assert_eq!(server.connections(), 1);
    assert_eq!(server.commands(), 3);
}

#[tokio::test]
async fn test_reset_connection_is_retried_once() {
    let server = FakeMemcached::start(FakeMode::DropConnections(1)).await;
    let cache = MemcachedCache::new(server.addr(), policy(2), None);

    cache.set("key", Bytes::from_static(b"value")).await.unwrap();
    assert_eq!(server.connections(), 2);
    assert_eq!(server.stored("key").await, Some(b"value".to_vec()));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = FakeMemcached::start(FakeMode::DropAll).await;
    let cache = MemcachedCache::new(server.addr(), policy(3), None);

    let err = cache.get("key").await.unwrap_err();
    assert!(err.is_connection_reset(), "unexpected error: {err}");
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn test_server_errors_are_not_retried() {
    let server = FakeMemcached::start(FakeMode::ServerError).await;
    let cache = MemcachedCache::new(server.addr(), policy(3), None);

    let err = cache.set("key", Bytes::from_static(b"value")).await.unwrap_err();
    assert!(matches!(err, CacheError::Protocol(_)));
    assert_eq!(server.connections(), 1);
    assert_eq!(server.commands(), 1);
}

#[tokio::test]
async fn test_long_keys_are_hashed_on_the_wire() {
    let server = FakeMemcached::start(FakeMode::Normal).await;
    let cache = MemcachedCache::new(server.addr(), policy(2), None);

    let key = format!("s3://bucket/{}.zarr", "deep/".repeat(60));
    cache.set(&key, Bytes::from_static(b"v")).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(Bytes::from_static(b"v")));
    assert!(server.stored(&key).await.is_none());
}

#[tokio::test]
async fn test_refused_connection_is_not_retried() {
    // Bind and immediately release a port so nothing is listening on it.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let cache = MemcachedCache::new(addr.to_string(), policy(3), None);

    let err = cache.get("key").await.unwrap_err();
    assert!(!err.is_connection_reset());
}
