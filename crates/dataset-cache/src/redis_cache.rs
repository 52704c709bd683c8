//! Redis-backed dataset cache.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::backend::CacheBackend;
use crate::error::CacheResult;

const CONNECT_RETRIES: usize = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis cache client.
///
/// The connection manager is built on first use and then shared by every
/// concurrent request. It re-establishes a dropped connection on its own:
/// the command that hit the broken connection fails, later ones go to the
/// new connection. A failed first connect leaves the cell empty, so the
/// next command tries again. Construct one instance at startup and hand
/// out `Arc`s. Commands themselves are not retried.
pub struct RedisCache {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    ttl: Option<Duration>,
}

impl RedisCache {
    /// Create a client for `redis_url`. No connection is made until the first command.
    pub fn new(redis_url: &str, ttl: Option<Duration>) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl,
        })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("Connecting to Redis");
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(CONNECT_RETRIES)
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(RESPONSE_TIMEOUT);
                ConnectionManager::new_with_config(self.client.clone(), config).await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let result: Option<Vec<u8>> = conn.get(key).await?;
        Ok(result.map(Bytes::from))
    }

    #[instrument(skip(self, value), fields(size = value.len()), level = "debug")]
    async fn set(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        match self.ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value.as_ref(), ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value.as_ref()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::FakeRedis;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisCache::new("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_surfaces_error() {
        let cache = RedisCache::new("redis://127.0.0.1:1/0", None).unwrap();
        assert!(cache.get("key").await.is_err());
        assert!(cache.set("key", Bytes::from_static(b"v")).await.is_err());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let server = FakeRedis::start(None).await;
        let cache = RedisCache::new(&server.url(), Some(Duration::from_secs(60))).unwrap();

        cache.set("k", Bytes::from_static(b"value")).await.unwrap();
        assert_eq!(server.stored("k").await, Some(b"value".to_vec()));
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"value")));
        assert_eq!(cache.get("missing").await.unwrap(), None);
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_server_hangs_up() {
        // Two setup commands plus one real command per connection.
        let server = FakeRedis::start(Some(3)).await;
        let cache = RedisCache::new(&server.url(), None).unwrap();

        cache.set("k", Bytes::from_static(b"value")).await.unwrap();

        let mut recovered = None;
        for _ in 0..10 {
            if let Ok(value) = cache.get("k").await {
                recovered = value;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(recovered, Some(Bytes::from_static(b"value")));
        assert!(server.connections() >= 2);
    }
}
