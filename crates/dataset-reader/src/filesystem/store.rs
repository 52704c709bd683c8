//! Key mappings that fetch on demand.
//!
//! [`RemoteStore`] serves a chunked store from a [`RemoteFileSystem`] and
//! [`ReferenceStore`] serves the virtual store a reference manifest
//! describes. Both are async zarrs stores; [`into_mapping`] wraps one in
//! the async-to-sync adapter the loaders read through. Nothing is fetched
//! until zarrs asks for a key, and every remote key or range goes through
//! the filesystem's byte-range cache.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use zarrs_storage::byte_range::ByteRange;
use zarrs_storage::storage_adapter::async_to_sync::AsyncToSyncStorageAdapter;
use zarrs_storage::{
    AsyncListableStorageTraits, AsyncReadableListableStorageTraits, AsyncReadableStorageTraits,
    MaybeAsyncBytes, ReadableListableStorage, StorageError, StoreKey, StoreKeys,
    StoreKeysPrefixes, StorePrefix,
};

use grid_common::{DatasetError, DatasetResult};

use super::reference::{self, RefEntry, ReferenceManifest};
use super::remote::{RemoteFileSystem, TokioBlockOn};

const CONSOLIDATED_KEY: &str = ".zmetadata";

/// Wrap an async store for the synchronous zarrs API.
pub fn into_mapping<S>(store: S) -> ReadableListableStorage
where
    S: AsyncReadableListableStorageTraits + 'static,
{
    Arc::new(AsyncToSyncStorageAdapter::new(Arc::new(store), TokioBlockOn))
}

/// How a [`RemoteStore`] enumerates its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// List the objects under the root.
    Objects,
    /// Derive keys from `.zmetadata`, for servers that cannot list.
    Consolidated,
}

pub struct RemoteStore {
    fs: Arc<RemoteFileSystem>,
    listing: Listing,
}

impl RemoteStore {
    pub fn new(fs: Arc<RemoteFileSystem>, listing: Listing) -> Self {
        Self { fs, listing }
    }

    async fn keys(&self) -> Result<StoreKeys, StorageError> {
        let keys = match self.listing {
            Listing::Objects => self.fs.list().await.map_err(storage_error)?,
            Listing::Consolidated => self.consolidated_keys().await.map_err(storage_error)?,
        };
        let mut keys = keys
            .into_iter()
            .map(StoreKey::new)
            .collect::<Result<Vec<_>, _>>()?;
        keys.sort();
        Ok(keys)
    }

    async fn consolidated_keys(&self) -> DatasetResult<Vec<String>> {
        let locator = self.fs.locator();
        let raw = self.fs.get(CONSOLIDATED_KEY).await?.ok_or_else(|| {
            DatasetError::open_failed(
                locator,
                "consolidated metadata (.zmetadata) is required to list this store over HTTP",
            )
        })?;
        let doc: Value = serde_json::from_slice(&raw)
            .map_err(|e| DatasetError::open_failed(locator, format!("invalid .zmetadata: {}", e)))?;
        let metadata = doc
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| DatasetError::open_failed(locator, ".zmetadata has no metadata map"))?;

        let mut keys = vec![CONSOLIDATED_KEY.to_string()];
        for (key, meta) in metadata {
            keys.push(key.clone());
            if let Some(array_dir) = key.strip_suffix(".zarray") {
                keys.extend(chunk_keys(array_dir, meta));
            }
        }
        debug!(locator = %locator, keys = keys.len(), "Listed store from consolidated metadata");
        Ok(keys)
    }
}

#[async_trait]
impl AsyncReadableStorageTraits for RemoteStore {
    async fn get(&self, key: &StoreKey) -> Result<MaybeAsyncBytes, StorageError> {
        self.fs.get(key.as_str()).await.map_err(storage_error)
    }

    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let mut size = None;
        let mut out = Vec::with_capacity(byte_ranges.len());
        for range in byte_ranges {
            let data = match range {
                ByteRange::FromStart(0, None) => self.fs.get(key.as_str()).await,
                ByteRange::FromStart(offset, Some(length)) => {
                    let span = usize_range(*offset, offset.saturating_add(*length))?;
                    self.fs.get_range(key.as_str(), span).await
                }
                _ => {
                    let total = match size {
                        Some(total) => total,
                        None => match self.size_key(key).await? {
                            Some(total) => *size.insert(total),
                            None => return Ok(None),
                        },
                    };
                    let span = span(range, total).ok_or_else(|| out_of_bounds(key, range, total))?;
                    self.fs.get_range(key.as_str(), span).await
                }
            }
            .map_err(storage_error)?;

            match data {
                Some(data) => out.push(data),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        self.fs.size(key.as_str()).await.map_err(storage_error)
    }
}

#[async_trait]
impl AsyncListableStorageTraits for RemoteStore {
    async fn list(&self) -> Result<StoreKeys, StorageError> {
        self.keys().await
    }

    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        Ok(with_prefix(self.keys().await?, prefix))
    }

    async fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        list_dir(self.keys().await?, prefix)
    }

    async fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        let mut total = 0;
        for key in with_prefix(self.keys().await?, prefix) {
            total += self.size_key(&key).await?.unwrap_or(0);
        }
        Ok(total)
    }
}

/// A file a reference manifest points into.
pub enum Target {
    Local(PathBuf),
    Remote(RemoteFileSystem),
}

/// The virtual store of a reference manifest. Each key is resolved to its
/// inline bytes or target range when it is read.
pub struct ReferenceStore {
    locator: String,
    manifest: ReferenceManifest,
    targets: HashMap<String, Target>,
}

impl ReferenceStore {
    pub fn new(
        locator: impl Into<String>,
        manifest: ReferenceManifest,
        targets: HashMap<String, Target>,
    ) -> Self {
        Self {
            locator: locator.into(),
            manifest,
            targets,
        }
    }

    fn target(&self, url: &str) -> DatasetResult<&Target> {
        self.targets
            .get(url)
            .ok_or_else(|| DatasetError::Internal(format!("unresolved reference target {}", url)))
    }

    fn target_error(&self, url: &str, detail: impl std::fmt::Display) -> DatasetError {
        DatasetError::open_failed(&self.locator, format!("{}: {}", url, detail))
    }

    async fn read_object(&self, url: &str) -> DatasetResult<Bytes> {
        match self.target(url)? {
            Target::Local(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| self.target_error(url, e)),
            Target::Remote(fs) => fs
                .get("")
                .await?
                .ok_or_else(|| self.target_error(url, "not found")),
        }
    }

    async fn read_range(&self, url: &str, span: Range<usize>) -> DatasetResult<Bytes> {
        match self.target(url)? {
            Target::Local(path) => reference::read_local_range(path, span.start, span.len())
                .await
                .map_err(|e| self.target_error(url, e)),
            Target::Remote(fs) => fs
                .get_range("", span)
                .await?
                .ok_or_else(|| self.target_error(url, "not found")),
        }
    }

    /// `range` of the value behind `entry`.
    async fn read_entry(&self, key: &StoreKey, entry: &RefEntry, range: &ByteRange) -> Result<Bytes, StorageError> {
        match entry {
            RefEntry::Inline(data) => slice(key, data, range),
            RefEntry::Object { url } => {
                let data = self.read_object(url).await.map_err(storage_error)?;
                slice(key, &data, range)
            }
            RefEntry::Range { url, offset, length } => {
                let total = *length as u64;
                let within = span(range, total).ok_or_else(|| out_of_bounds(key, range, total))?;
                let start = offset + within.start;
                self.read_range(url, start..start + within.len())
                    .await
                    .map_err(storage_error)
            }
        }
    }

    fn keys(&self) -> Result<StoreKeys, StorageError> {
        Ok(self
            .manifest
            .entries()
            .map(|(key, _)| StoreKey::new(key))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl AsyncReadableStorageTraits for ReferenceStore {
    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let Some(entry) = self.manifest.get(key.as_str()) else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(byte_ranges.len());
        for range in byte_ranges {
            out.push(self.read_entry(key, entry, range).await?);
        }
        Ok(Some(out))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let size = match self.manifest.get(key.as_str()) {
            None => return Ok(None),
            Some(RefEntry::Inline(data)) => data.len() as u64,
            Some(RefEntry::Range { length, .. }) => *length as u64,
            Some(RefEntry::Object { url }) => self.read_object(url).await.map_err(storage_error)?.len() as u64,
        };
        Ok(Some(size))
    }
}

#[async_trait]
impl AsyncListableStorageTraits for ReferenceStore {
    async fn list(&self) -> Result<StoreKeys, StorageError> {
        self.keys()
    }

    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        Ok(with_prefix(self.keys()?, prefix))
    }

    async fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        list_dir(self.keys()?, prefix)
    }

    async fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        let mut total = 0;
        for key in with_prefix(self.keys()?, prefix) {
            total += self.size_key(&key).await?.unwrap_or(0);
        }
        Ok(total)
    }
}

fn storage_error(err: DatasetError) -> StorageError {
    StorageError::Other(err.to_string())
}

fn out_of_bounds(key: &StoreKey, range: &ByteRange, size: u64) -> StorageError {
    StorageError::Other(format!("byte range {} is outside {} ({} bytes)", range, key, size))
}

fn usize_range(start: u64, end: u64) -> Result<Range<usize>, StorageError> {
    let convert = |v: u64| {
        usize::try_from(v).map_err(|_| StorageError::Other(format!("offset {} does not fit in memory", v)))
    };
    Ok(convert(start)?..convert(end)?)
}

/// Absolute span of `range` in a value of `size` bytes, if it fits.
fn span(range: &ByteRange, size: u64) -> Option<Range<usize>> {
    let (start, end) = match *range {
        ByteRange::FromStart(offset, None) => (offset, size),
        ByteRange::FromStart(offset, Some(length)) => (offset, offset.checked_add(length)?),
        ByteRange::Suffix(length) => (size.checked_sub(length)?, size),
    };
    if start > end || end > size {
        return None;
    }
    usize_range(start, end).ok()
}

fn slice(key: &StoreKey, data: &Bytes, range: &ByteRange) -> Result<Bytes, StorageError> {
    let total = data.len() as u64;
    let span = span(range, total).ok_or_else(|| out_of_bounds(key, range, total))?;
    Ok(data.slice(span))
}

fn with_prefix(keys: StoreKeys, prefix: &StorePrefix) -> StoreKeys {
    keys.into_iter().filter(|key| key.has_prefix(prefix)).collect()
}

/// Direct children of `prefix`: keys, and the prefixes one level down.
fn list_dir(keys: StoreKeys, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
    let mut children = Vec::new();
    let mut prefixes = BTreeSet::new();
    for key in with_prefix(keys, prefix) {
        let rest = key.as_str()[prefix.as_str().len()..].trim_start_matches('/');
        match rest.split_once('/') {
            Some((dir, _)) => {
                prefixes.insert(StorePrefix::new(format!("{}{}/", prefix.as_str(), dir))?);
            }
            None => children.push(key),
        }
    }
    Ok(StoreKeysPrefixes::new(children, prefixes.into_iter().collect()))
}

/// Every chunk key of a Zarr v2 array, given its `.zarray` document.
pub(crate) fn chunk_keys(array_dir: &str, zarray: &Value) -> Vec<String> {
    let dims = |field: &str| -> Vec<u64> {
        zarray
            .get(field)
            .and_then(Value::as_array)
            .map(|v| v.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default()
    };
    let shape = dims("shape");
    let chunks = dims("chunks");
    let separator = zarray
        .get("dimension_separator")
        .and_then(Value::as_str)
        .unwrap_or(".");

    if shape.is_empty() {
        return vec![format!("{}0", array_dir)];
    }
    if chunks.len() != shape.len() || chunks.contains(&0) {
        return Vec::new();
    }

    let grid: Vec<u64> = shape
        .iter()
        .zip(&chunks)
        .map(|(s, c)| s.div_ceil(*c))
        .collect();
    if grid.contains(&0) {
        return Vec::new();
    }

    let mut keys = Vec::new();
    let mut idx = vec![0u64; grid.len()];
    loop {
        let coords: Vec<String> = idx.iter().map(u64::to_string).collect();
        keys.push(format!("{}{}", array_dir, coords.join(separator)));

        let mut d = grid.len();
        loop {
            if d == 0 {
                return keys;
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < grid[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}
