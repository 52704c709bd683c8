//! Memcached-backed dataset cache.
//!
//! A minimal text-protocol client (`get` / `set`) over one TCP connection,
//! wrapped in a fixed retry policy. Only dropped or reset connections are
//! retried; server errors and refused connections surface immediately.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// Retry schedule for transient connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(10),
        }
    }
}

/// Memcached cache client.
pub struct MemcachedCache {
    addr: String,
    retry: RetryPolicy,
    ttl: Option<Duration>,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl MemcachedCache {
    pub fn new(addr: impl Into<String>, retry: RetryPolicy, ttl: Option<Duration>) -> Self {
        Self {
            addr: addr.into(),
            retry,
            ttl,
            conn: Mutex::new(None),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn retrying<T, F, Fut>(&self, op: &'static str, mut call: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_connection_reset() && attempt < attempts => {
                    warn!(
                        op = op,
                        attempt = attempt,
                        error = %e,
                        "Memcached connection reset, retrying"
                    );
                    metrics::counter!("dataset_cache_retries_total", "op" => op).increment(1);
                    attempt += 1;
                    tokio::time::sleep(self.retry.delay).await;
                }
                result => return result,
            }
        }
    }

    /// Run one command on the shared connection; it is only put back on success.
    async fn get_once(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let result = read_get(&mut stream, key).await;
        if result.is_ok() {
            *guard = Some(stream);
        }
        result
    }

    async fn set_once(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let exptime = self.ttl.map(|t| t.as_secs()).unwrap_or(0);
        let result = write_set(&mut stream, key, value, exptime).await;
        if result.is_ok() {
            *guard = Some(stream);
        }
        result
    }

    async fn connect(&self) -> CacheResult<BufStream<TcpStream>> {
        debug!(addr = %self.addr, "Connecting to memcached");
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(BufStream::new(stream))
    }
}

#[async_trait]
impl CacheBackend for MemcachedCache {
    fn name(&self) -> &'static str {
        "memcached"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let key = wire_key(key);
        self.retrying("get", || self.get_once(&key)).await
    }

    async fn set(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let key = wire_key(key);
        self.retrying("set", || self.set_once(&key, &value)).await
    }
}

/// Keys that are too long or contain whitespace/control bytes are replaced
/// by their SHA-256 hex digest.
fn wire_key(key: &str) -> String {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_graphic());
    if valid {
        key.to_string()
    } else {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }
}

async fn read_line(stream: &mut BufStream<TcpStream>) -> CacheResult<String> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "memcached closed the connection",
        )
        .into());
    }
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

async fn read_get(stream: &mut BufStream<TcpStream>, key: &str) -> CacheResult<Option<Bytes>> {
    stream.write_all(format!("get {}\r\n", key).as_bytes()).await?;
    stream.flush().await?;

    let header = read_line(stream).await?;
    if header == "END" {
        return Ok(None);
    }

    // VALUE <key> <flags> <bytes>
    let mut parts = header.split_ascii_whitespace();
    let len = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("VALUE"), Some(_), Some(_), Some(len)) => len
            .parse::<usize>()
            .map_err(|_| CacheError::Protocol(format!("bad value header: {}", header)))?,
        _ => return Err(CacheError::Protocol(header)),
    };

    let mut data = vec![0u8; len + 2];
    stream.read_exact(&mut data).await?;
    data.truncate(len);

    let end = read_line(stream).await?;
    if end != "END" {
        return Err(CacheError::Protocol(format!("expected END, got {}", end)));
    }

    Ok(Some(Bytes::from(data)))
}

async fn write_set(
    stream: &mut BufStream<TcpStream>,
    key: &str,
    value: &[u8],
    exptime: u64,
) -> CacheResult<()> {
    stream
        .write_all(format!("set {} 0 {} {}\r\n", key, exptime, value.len()).as_bytes())
        .await?;
    stream.write_all(value).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;

    let reply = read_line(stream).await?;
    if reply == "STORED" {
        Ok(())
    } else {
        Err(CacheError::Protocol(reply))
    }
}
