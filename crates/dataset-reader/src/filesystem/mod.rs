//! Filesystem selection per storage protocol.
//!
//! Each protocol maps to one handler that turns a locator into a
//! [`FileSource`] the loaders understand. Remote handlers optionally go
//! through the local byte-range cache.

pub mod reference;
pub mod remote;
pub mod store;

pub use reference::{RefEntry, ReferenceManifest};
pub use remote::{RemoteFileSystem, TokioBlockOn};
pub use store::{Listing, ReferenceStore, RemoteStore};

use bytes::Bytes;
use dataset_cache::DiskCache;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use zarrs_storage::ReadableListableStorage;

use grid_common::{DatasetError, DatasetResult};

use crate::config::ReaderConfig;
use crate::engine::Engine;
use crate::protocol::Protocol;
use store::Target;

/// What a loader opens.
#[derive(Clone)]
pub enum FileSource {
    /// A local path, passed through unchanged.
    Path(PathBuf),
    /// A whole legacy grid file read into memory.
    Stream(Bytes),
    /// A key mapping over a chunked store.
    Mapping(ReadableListableStorage),
}

impl FileSource {
    pub fn kind(&self) -> &'static str {
        match self {
            FileSource::Path(_) => "path",
            FileSource::Stream(_) => "stream",
            FileSource::Mapping(_) => "mapping",
        }
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileSource::Stream(b) => f.debug_tuple("Stream").field(&b.len()).finish(),
            FileSource::Mapping(_) => f.write_str("Mapping(..)"),
        }
    }
}

/// Builds file sources, owning the byte-range cache shared by remote reads.
pub struct FilesystemProvider {
    config: ReaderConfig,
    byte_cache: OnceCell<Option<Arc<DiskCache>>>,
}

impl FilesystemProvider {
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            config,
            byte_cache: OnceCell::new(),
        }
    }

    /// Use `cache` as the byte-range cache regardless of configuration.
    pub fn with_byte_cache(self, cache: Arc<DiskCache>) -> Self {
        Self {
            byte_cache: OnceCell::new_with(Some(Some(cache))),
            ..self
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// The byte-range cache, opened on first use. An unusable cache directory
    /// disables caching instead of failing reads.
    async fn byte_cache(&self) -> Option<Arc<DiskCache>> {
        self.byte_cache
            .get_or_init(|| async {
                if !self.config.fs_cache_enabled {
                    return None;
                }
                match DiskCache::open(
                    &self.config.fs_cache_directory,
                    self.config.fs_cache_size_limit_bytes(),
                )
                .await
                {
                    Ok(cache) => {
                        info!(
                            dir = %self.config.fs_cache_directory.display(),
                            "Byte-range cache enabled"
                        );
                        Some(Arc::new(cache))
                    }
                    Err(e) => {
                        warn!(error = %e, "Byte-range cache unavailable; reading uncached");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Produce the source for `locator`.
    pub async fn source(
        &self,
        locator: &str,
        protocol: Protocol,
        engine: Engine,
        anon: bool,
    ) -> DatasetResult<FileSource> {
        debug!(locator = %locator, protocol = %protocol, engine = %engine, "Resolving filesystem");
        match protocol {
            Protocol::File => Ok(self.file_source(locator)),
            Protocol::S3 => self.s3_source(locator, engine, anon).await,
            Protocol::Http | Protocol::Https => self.http_source(locator, protocol, engine).await,
            Protocol::Reference => self.reference_source(locator, anon).await,
        }
    }

    fn file_source(&self, locator: &str) -> FileSource {
        FileSource::Path(PathBuf::from(
            locator.strip_prefix("file://").unwrap_or(locator),
        ))
    }

    async fn s3_source(&self, locator: &str, engine: Engine, anon: bool) -> DatasetResult<FileSource> {
        let cache = self.byte_cache().await;
        let cached = cache.is_some();
        let fs = RemoteFileSystem::s3(locator, &self.config.s3, anon, cache)?;
        match engine {
            Engine::LegacyGrid => stream(&fs).await,
            Engine::ChunkedStore if cached => Ok(FileSource::Mapping(store::into_mapping(
                RemoteStore::new(Arc::new(fs), Listing::Objects),
            ))),
            Engine::ChunkedStore => Ok(FileSource::Mapping(fs.mapping())),
        }
    }

    async fn http_source(&self, locator: &str, protocol: Protocol, engine: Engine) -> DatasetResult<FileSource> {
        let fs = RemoteFileSystem::http(locator, protocol, self.byte_cache().await)?;
        match engine {
            Engine::LegacyGrid => stream(&fs).await,
            // Plain HTTP cannot list, so keys come from the consolidated metadata.
            Engine::ChunkedStore => Ok(FileSource::Mapping(store::into_mapping(
                RemoteStore::new(Arc::new(fs), Listing::Consolidated),
            ))),
        }
    }

    async fn reference_source(&self, locator: &str, anon: bool) -> DatasetResult<FileSource> {
        let raw = self.read_manifest(locator, anon).await?;
        let mut manifest = ReferenceManifest::parse(&raw)
            .map_err(|e| DatasetError::open_failed(locator, e))?;
        manifest.resolve_relative(locator);

        let targets = self.reference_targets(&manifest, anon).await?;
        debug!(
            locator = %locator,
            keys = manifest.len(),
            targets = targets.len(),
            "Resolving reference manifest"
        );
        Ok(FileSource::Mapping(store::into_mapping(ReferenceStore::new(
            locator, manifest, targets,
        ))))
    }

    async fn read_manifest(&self, locator: &str, anon: bool) -> DatasetResult<Bytes> {
        let protocol = Protocol::classify(locator, false);
        let fs = match protocol {
            Protocol::S3 => RemoteFileSystem::s3(locator, &self.config.s3, anon, None)?,
            Protocol::Http | Protocol::Https => RemoteFileSystem::http(locator, protocol, None)?,
            _ => {
                let path = locator.strip_prefix("file://").unwrap_or(locator);
                return tokio::fs::read(path)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| DatasetError::open_failed(locator, e));
            }
        };
        fs.get("")
            .await?
            .ok_or_else(|| DatasetError::open_failed(locator, "reference manifest not found"))
    }

    async fn reference_targets(
        &self,
        manifest: &ReferenceManifest,
        anon: bool,
    ) -> DatasetResult<HashMap<String, Target>> {
        let cache = self.byte_cache().await;
        let mut targets = HashMap::new();
        for url in manifest.targets() {
            let target = match Protocol::classify(url, false) {
                Protocol::S3 => Target::Remote(RemoteFileSystem::s3(url, &self.config.s3, anon, cache.clone())?),
                protocol @ (Protocol::Http | Protocol::Https) => {
                    Target::Remote(RemoteFileSystem::http(url, protocol, cache.clone())?)
                }
                _ => Target::Local(PathBuf::from(url.strip_prefix("file://").unwrap_or(url))),
            };
            targets.insert(url.to_string(), target);
        }
        Ok(targets)
    }
}

async fn stream(fs: &RemoteFileSystem) -> DatasetResult<FileSource> {
    let data = fs
        .get("")
        .await?
        .ok_or_else(|| DatasetError::open_failed(fs.locator(), "object not found"))?;
    Ok(FileSource::Stream(data))
}
