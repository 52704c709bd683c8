//! Remote object filesystems (S3 and HTTP) with an optional byte-range cache.

use bytes::Bytes;
use dataset_cache::{CacheBackend, DiskCache};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use std::ops::Range;
use std::sync::Arc;
use tracing::{instrument, warn};
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};
use zarrs_storage::ReadableListableStorage;

use grid_common::{DatasetError, DatasetResult};

use crate::config::S3Config;
use crate::protocol::Protocol;

/// Blocking executor that works from within a tokio runtime.
///
/// Uses `tokio::task::block_in_place` to move the current task to a blocking
/// thread, then uses the runtime handle to drive the future.
#[derive(Clone, Copy)]
pub struct TokioBlockOn;

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

/// A remote object tree rooted at one locator.
///
/// Keys passed to the methods are relative to the root; the empty key is
/// the root object itself (a single legacy file).
pub struct RemoteFileSystem {
    protocol: Protocol,
    locator: String,
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
    cache: Option<Arc<DiskCache>>,
}

impl RemoteFileSystem {
    pub fn new(
        protocol: Protocol,
        locator: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        root: &str,
        cache: Option<Arc<DiskCache>>,
    ) -> Self {
        Self {
            protocol,
            locator: locator.into(),
            store,
            root: ObjectPath::from(root.trim_matches('/')),
            cache,
        }
    }

    /// Filesystem for `s3://bucket/prefix`.
    pub fn s3(
        locator: &str,
        config: &S3Config,
        anon: bool,
        cache: Option<Arc<DiskCache>>,
    ) -> DatasetResult<Self> {
        let (bucket, prefix) = split_s3_locator(locator)?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http)
            .with_skip_signature(anon);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let s3 = builder
            .build()
            .map_err(|e| DatasetError::open_failed(locator, format!("failed to create S3 client: {}", e)))?;

        Ok(Self::new(Protocol::S3, locator, Arc::new(s3), prefix, cache))
    }

    /// Filesystem for an `http(s)://host/path` locator, rooted at the path.
    pub fn http(
        locator: &str,
        protocol: Protocol,
        cache: Option<Arc<DiskCache>>,
    ) -> DatasetResult<Self> {
        let (origin, path) = split_http_locator(locator)?;
        let store = HttpBuilder::new()
            .with_url(origin)
            .build()
            .map_err(|e| DatasetError::open_failed(locator, format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::new(protocol, locator, Arc::new(store), path, cache))
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    fn object_path(&self, key: &str) -> ObjectPath {
        let key = key.trim_matches('/');
        match (self.root.as_ref().is_empty(), key.is_empty()) {
            (_, true) => self.root.clone(),
            (true, false) => ObjectPath::from(key),
            (false, false) => ObjectPath::from(format!("{}/{}", self.root, key)),
        }
    }

    fn cache_key(&self, key: &str, range: Option<&Range<usize>>) -> String {
        let span = match range {
            Some(r) => format!("{}-{}", r.start, r.end),
            None => "*".to_string(),
        };
        format!("{}::{}::{}::{}", self.protocol, self.locator, key, span)
    }

    async fn cached(&self, cache_key: &str) -> Option<Bytes> {
        let cache = self.cache.as_ref()?;
        match cache.get(cache_key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Byte-range cache read failed; bypassing");
                None
            }
        }
    }

    async fn fill(&self, cache_key: &str, data: &Bytes) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(cache_key, data.clone()).await {
                warn!(key = %cache_key, error = %e, "Byte-range cache write failed");
            }
        }
    }

    /// Whole object, or `None` if it does not exist.
    #[instrument(skip(self), fields(locator = %self.locator), level = "debug")]
    pub async fn get(&self, key: &str) -> DatasetResult<Option<Bytes>> {
        let cache_key = self.cache_key(key, None);
        if let Some(hit) = self.cached(&cache_key).await {
            return Ok(Some(hit));
        }

        let path = self.object_path(key);
        let data = match self.store.get(&path).await {
            Ok(result) => result.bytes().await.map_err(|e| self.store_error(&path, e))?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(self.store_error(&path, e)),
        };

        self.fill(&cache_key, &data).await;
        Ok(Some(data))
    }

    /// Bytes `range` of an object, or `None` if the object does not exist.
    #[instrument(skip(self), fields(locator = %self.locator), level = "debug")]
    pub async fn get_range(&self, key: &str, range: Range<usize>) -> DatasetResult<Option<Bytes>> {
        let cache_key = self.cache_key(key, Some(&range));
        if let Some(hit) = self.cached(&cache_key).await {
            return Ok(Some(hit));
        }

        let path = self.object_path(key);
        let data = match self.store.get_range(&path, range).await {
            Ok(data) => data,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(self.store_error(&path, e)),
        };

        self.fill(&cache_key, &data).await;
        Ok(Some(data))
    }

    /// Object size in bytes, or `None` if it does not exist.
    pub async fn size(&self, key: &str) -> DatasetResult<Option<u64>> {
        let path = self.object_path(key);
        match self.store.head(&path).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(self.store_error(&path, e)),
        }
    }

    /// Keys under the root, relative to it.
    pub async fn list(&self) -> DatasetResult<Vec<String>> {
        let prefix = (!self.root.as_ref().is_empty()).then_some(&self.root);
        let metas: Vec<_> = self
            .store
            .list(prefix)
            .try_collect()
            .await
            .map_err(|e| self.store_error(&self.root, e))?;

        let root = self.root.as_ref();
        Ok(metas
            .into_iter()
            .filter_map(|meta| {
                let location = meta.location.as_ref();
                if root.is_empty() {
                    Some(location.to_string())
                } else {
                    location
                        .strip_prefix(root)
                        .map(|rest| rest.trim_start_matches('/').to_string())
                }
            })
            .filter(|key| !key.is_empty())
            .collect())
    }

    /// Key mapping straight over the object store, bypassing the byte-range cache.
    pub fn mapping(&self) -> ReadableListableStorage {
        let prefixed = PrefixStore::new(self.store.clone(), self.root.clone());
        let async_store = Arc::new(AsyncObjectStore::new(prefixed));
        Arc::new(AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn))
    }

    fn store_error(&self, path: &ObjectPath, err: object_store::Error) -> DatasetError {
        DatasetError::open_failed(&self.locator, format!("{}: {}", path, err))
    }
}

/// `s3://bucket/prefix` -> (bucket, prefix)
pub fn split_s3_locator(locator: &str) -> DatasetResult<(&str, &str)> {
    let rest = locator
        .strip_prefix("s3://")
        .ok_or_else(|| DatasetError::Configuration(format!("not an s3 locator: {}", locator)))?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(DatasetError::open_failed(locator, "missing bucket name"));
    }
    Ok((bucket, prefix.trim_end_matches('/')))
}

/// `https://host:port/a/b` -> ("https://host:port", "a/b")
pub fn split_http_locator(locator: &str) -> DatasetResult<(&str, &str)> {
    let scheme_end = locator
        .find("://")
        .ok_or_else(|| DatasetError::Configuration(format!("not an http locator: {}", locator)))?
        + 3;
    let path_start = locator[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(locator.len());
    if path_start == scheme_end {
        return Err(DatasetError::open_failed(locator, "missing host"));
    }
    let path = locator[path_start..]
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_matches('/');
    Ok((&locator[..path_start], path))
}
