//! Cache-aside dataset opening.
//!
//! [`DatasetOpener::open`] checks the injected cache backend, falls through
//! to a fresh open on a miss, and writes the result back. The cache is an
//! optimization only: every backend failure is logged, counted and then
//! treated as a miss (on read) or ignored (on write).

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use dataset_cache::{CacheBackend, CacheKey};
use grid_common::{Dataset, DatasetResult, OpenOptions};

use crate::engine::Engine;
use crate::filesystem::FilesystemProvider;
use crate::loader;
use crate::open_args::OpenArgs;
use crate::protocol::Protocol;

/// Opens datasets through the configured cache tier.
///
/// Construct once at startup with the process-wide cache backend and share
/// it. Concurrent misses on the same key each open the dataset and each
/// write it back; no request waits on another.
pub struct DatasetOpener {
    provider: FilesystemProvider,
    cache: Arc<dyn CacheBackend>,
}

impl DatasetOpener {
    pub fn new(provider: FilesystemProvider, cache: Arc<dyn CacheBackend>) -> Self {
        Self { provider, cache }
    }

    pub fn provider(&self) -> &FilesystemProvider {
        &self.provider
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    /// Open options with the configured anonymous-access default.
    pub fn default_options(&self) -> OpenOptions {
        OpenOptions::default().with_anon(self.provider.config().anon_default)
    }

    /// Open `locator`, serving from the cache when possible.
    #[instrument(skip(self, opts), fields(group = ?opts.group))]
    pub async fn open(&self, locator: &str, opts: &OpenOptions) -> DatasetResult<Dataset> {
        if !self.cache.is_enabled() {
            return self.open_fresh(locator, opts).await;
        }

        let key = CacheKey::new(locator, opts.group);
        if let Some(ds) = self.lookup(&key).await {
            return Ok(ds);
        }

        let ds = self.open_fresh(locator, opts).await?;
        self.store(&key, &ds).await;
        Ok(ds)
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Dataset> {
        let backend = self.cache.name();
        match self.cache.get(key.as_str()).await {
            Ok(Some(raw)) => match Dataset::from_bytes(&raw) {
                Ok(ds) => {
                    debug!(key = %key, backend = backend, size = raw.len(), "Dataset cache hit");
                    metrics::counter!("dataset_cache_hits_total", "backend" => backend).increment(1);
                    Some(ds)
                }
                Err(e) => {
                    warn!(key = %key, backend = backend, error = %e, "Discarding undecodable cache entry");
                    metrics::counter!("dataset_cache_misses_total", "backend" => backend).increment(1);
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, backend = backend, "Dataset cache miss");
                metrics::counter!("dataset_cache_misses_total", "backend" => backend).increment(1);
                None
            }
            Err(e) => {
                warn!(key = %key, backend = backend, error = %e, "Cache read failed; opening without cache");
                metrics::counter!("dataset_cache_errors_total", "backend" => backend, "op" => "get")
                    .increment(1);
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, ds: &Dataset) {
        let backend = self.cache.name();
        let encoded = match ds.to_bytes() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode dataset for cache");
                metrics::counter!("dataset_cache_errors_total", "backend" => backend, "op" => "encode")
                    .increment(1);
                return;
            }
        };

        let size = encoded.len();
        match self.cache.set(key.as_str(), encoded).await {
            Ok(()) => debug!(key = %key, backend = backend, size = size, "Stored dataset in cache"),
            Err(e) => {
                warn!(key = %key, backend = backend, error = %e, "Cache write failed");
                metrics::counter!("dataset_cache_errors_total", "backend" => backend, "op" => "set")
                    .increment(1);
            }
        }
    }

    /// Open without consulting the cache.
    pub async fn open_fresh(&self, locator: &str, opts: &OpenOptions) -> DatasetResult<Dataset> {
        let protocol = Protocol::classify(locator, opts.reference);
        let engine = if opts.reference {
            Engine::ChunkedStore
        } else {
            Engine::select(locator)
        };
        let args = OpenArgs::build(opts, engine);

        let source = self
            .provider
            .source(locator, protocol, engine, opts.anon)
            .await?;
        let ds = loader::load(locator, source, &args).await?;

        info!(
            locator = %locator,
            protocol = %protocol,
            engine = %engine,
            variables = ds.data_vars.len(),
            "Opened dataset"
        );
        metrics::counter!(
            "dataset_opens_total",
            "protocol" => protocol.as_str(),
            "engine" => engine.as_str()
        )
        .increment(1);

        Ok(ds)
    }
}
