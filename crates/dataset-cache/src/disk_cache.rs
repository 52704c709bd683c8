//! Persistent on-disk cache with least-frequently-used eviction.
//!
//! Each value lives in its own file under the cache directory. An
//! `index.json` file records, per key, the file name, size, hit count and a
//! logical access clock so the cache survives restarts. When the total size
//! exceeds the limit, entries with the fewest hits are removed first; ties go
//! to the entry accessed longest ago.
//!
//! The directory may be shared by several processes (for example on a
//! network volume). Every change to the index is a read-modify-write of
//! `index.json` under an exclusive `flock` on `index.json.lock`, so writers
//! in different processes merge their entries instead of overwriting each
//! other. Reads never take the lock: hits are counted in memory and folded
//! into the index on the next write or [`DiskCache::flush`].
//!
//! The same type serves as the whole-dataset tier and as the byte-range cache
//! wrapped around remote object stores.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};

const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.json.lock";
const ENTRY_EXT: &str = "bin";
const TEMP_EXT: &str = "tmp";

/// Unindexed files younger than this may belong to a write still in flight.
const ORPHAN_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    size: u64,
    hits: u64,
    last_access: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiskIndex {
    entries: HashMap<String, IndexEntry>,
    clock: u64,
}

impl DiskIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Least frequently used key, excluding `keep`.
    fn eviction_candidate(&self, keep: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != keep)
            .min_by_key(|(_, e)| (e.hits, e.last_access))
            .map(|(k, _)| k.clone())
    }

    /// Fold hits recorded in memory into the index, in the order they happened.
    fn merge_hits(&mut self, pending: HashMap<String, PendingHit>) {
        let mut pending: Vec<_> = pending.into_iter().collect();
        pending.sort_by_key(|(_, hit)| hit.order);
        for (key, hit) in pending {
            let now = self.tick();
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.hits += hit.hits;
                entry.last_access = now;
            }
        }
    }

    /// Remove entries until the total size fits, never touching `keep`.
    fn evict(&mut self, dir: &Path, size_limit: u64, keep: &str) -> usize {
        let mut evicted = 0;
        while self.total_size() > size_limit {
            let Some(victim) = self.eviction_candidate(keep) else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                debug!(key = %victim, hits = entry.hits, size = entry.size, "Evicting cache entry");
                remove_file(dir, &entry.file);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Hits on one key since the index was last written by this instance.
#[derive(Debug, Default, Clone, Copy)]
struct PendingHit {
    hits: u64,
    order: u64,
}

/// Statistics for the disk cache.
#[derive(Debug, Default, Clone)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_bytes: u64,
}

impl DiskCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct DiskState {
    /// Last index seen on disk.
    index: DiskIndex,
    /// Modification stamp of `index.json` when `index` was read.
    index_stamp: IndexStamp,
    pending: HashMap<String, PendingHit>,
    order: u64,
    stats: DiskCacheStats,
}

impl DiskState {
    /// Replace the snapshot unless it is older than the one held.
    fn adopt(&mut self, index: DiskIndex) {
        if index.clock >= self.index.clock {
            self.index = index;
        }
        self.stats.entries = self.index.entries.len();
        self.stats.total_bytes = self.index.total_size();
    }
}

/// Size-bounded LFU cache stored in a local or shared directory.
pub struct DiskCache {
    dir: PathBuf,
    size_limit: u64,
    state: Mutex<DiskState>,
}

impl DiskCache {
    /// Open (or create) a cache directory.
    ///
    /// Entries whose files have disappeared are dropped from the index, and
    /// entry files the index does not list are deleted once they are older
    /// than a short grace period.
    pub async fn open(dir: impl Into<PathBuf>, size_limit: u64) -> CacheResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let (index, index_stamp, (dropped, orphans)) = update_index(&dir, |dir, index| {
            let missing: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, e)| !dir.join(&e.file).exists())
                .map(|(k, _)| k.clone())
                .collect();
            for key in &missing {
                index.entries.remove(key);
            }
            (missing.len(), remove_orphans(dir, index))
        })
        .await?;

        debug!(
            dir = %dir.display(),
            entries = index.entries.len(),
            dropped = dropped,
            orphans = orphans,
            "Opened disk cache"
        );

        let stats = DiskCacheStats {
            entries: index.entries.len(),
            total_bytes: index.total_size(),
            ..Default::default()
        };
        Ok(Self {
            dir,
            size_limit,
            state: Mutex::new(DiskState {
                index,
                index_stamp,
                pending: HashMap::new(),
                order: 0,
                stats,
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    pub async fn stats(&self) -> DiskCacheStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.refresh().await;
        self.state.lock().await.index.entries.contains_key(key)
    }

    /// Write hit counts recorded since the last index update.
    pub async fn flush(&self) -> CacheResult<()> {
        let pending = std::mem::take(&mut self.state.lock().await.pending);
        if pending.is_empty() {
            return Ok(());
        }
        let (index, stamp, ()) =
            update_index(&self.dir, move |_, index| index.merge_hits(pending)).await?;
        let mut state = self.state.lock().await;
        state.index_stamp = stamp;
        state.adopt(index);
        Ok(())
    }

    /// Reload the index when another writer has replaced it.
    async fn refresh(&self) {
        let stamp = index_stamp(&self.dir).await;
        if stamp.is_none() || stamp == self.state.lock().await.index_stamp {
            return;
        }
        match read_index_async(&self.dir).await {
            Ok(index) => {
                let mut state = self.state.lock().await;
                state.index_stamp = stamp;
                state.adopt(index);
            }
            Err(e) => debug!(dir = %self.dir.display(), error = %e, "Cache index reload failed"),
        }
    }

    async fn entry_file(&self, key: &str) -> Option<String> {
        self.state.lock().await.index.entries.get(key).map(|e| e.file.clone())
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let file = match self.entry_file(key).await {
            Some(file) => Some(file),
            None => {
                self.refresh().await;
                self.entry_file(key).await
            }
        };
        let Some(file) = file else {
            self.state.lock().await.stats.misses += 1;
            return Ok(None);
        };

        let data = match tokio::fs::read(self.dir.join(&file)).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Evicted by another process, or removed by hand.
                debug!(key = %key, "Cache file vanished; treating as a miss");
                let mut state = self.state.lock().await;
                state.index.entries.remove(key);
                state.pending.remove(key);
                state.stats.misses += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state.lock().await;
        state.order += 1;
        let order = state.order;
        let hit = state.pending.entry(key.to_string()).or_default();
        hit.hits += 1;
        hit.order = order;
        state.stats.hits += 1;

        Ok(Some(Bytes::from(data)))
    }

    async fn set(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let size = value.len() as u64;
        if size > self.size_limit {
            warn!(
                key = %key,
                size = size,
                limit = self.size_limit,
                "Value larger than disk cache limit; not stored"
            );
            return Ok(());
        }

        let file = format!("{}.{}", uuid::Uuid::new_v4(), ENTRY_EXT);
        write_atomic(&self.dir.join(&file), &value).await?;

        let pending = std::mem::take(&mut self.state.lock().await.pending);
        let owned_key = key.to_string();
        let entry_file = file.clone();
        let size_limit = self.size_limit;
        let result = update_index(&self.dir, move |dir, index| {
            index.merge_hits(pending);
            let now = index.tick();
            let previous = index.entries.insert(
                owned_key.clone(),
                IndexEntry {
                    file: entry_file,
                    size,
                    hits: 0,
                    last_access: now,
                },
            );
            if let Some(previous) = previous {
                remove_file(dir, &previous.file);
            }
            index.evict(dir, size_limit, &owned_key)
        })
        .await;

        let (index, stamp, evicted) = match result {
            Ok(updated) => updated,
            Err(e) => {
                remove_file(&self.dir, &file);
                return Err(e);
            }
        };

        if evicted > 0 {
            metrics::counter!("dataset_disk_cache_evictions_total").increment(evicted as u64);
        }
        let mut state = self.state.lock().await;
        state.stats.evictions += evicted as u64;
        state.index_stamp = stamp;
        state.adopt(index);
        Ok(())
    }
}

/// Exclusive advisory lock on the index, released on drop.
#[cfg(unix)]
struct IndexLock {
    file: std::fs::File,
}

#[cfg(unix)]
impl IndexLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        // SAFETY: the descriptor is owned by `file` and outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

#[cfg(unix)]
impl Drop for IndexLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        // SAFETY: see `acquire`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
struct IndexLock;

#[cfg(not(unix))]
impl IndexLock {
    fn acquire(_path: &Path) -> io::Result<Self> {
        Ok(Self)
    }
}

type IndexStamp = Option<(SystemTime, u64)>;

/// Read, modify and write the index under the directory lock.
///
/// Returns the written index with the stamp of the file as written.
async fn update_index<R, F>(dir: &Path, update: F) -> CacheResult<(DiskIndex, IndexStamp, R)>
where
    R: Send + 'static,
    F: FnOnce(&Path, &mut DiskIndex) -> R + Send + 'static,
{
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> CacheResult<(DiskIndex, IndexStamp, R)> {
        let _lock = IndexLock::acquire(&dir.join(LOCK_FILE))?;
        let mut index = read_index(&dir)?;
        let out = update(&dir, &mut index);
        let raw = serde_json::to_vec(&index)?;
        let tmp = dir.join(format!("{}.{}.{}", INDEX_FILE, uuid::Uuid::new_v4(), TEMP_EXT));
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, dir.join(INDEX_FILE))?;
        let stamp = std::fs::metadata(dir.join(INDEX_FILE))
            .ok()
            .and_then(|m| Some((m.modified().ok()?, m.len())));
        Ok((index, stamp, out))
    })
    .await
    .map_err(|e| CacheError::Index(format!("index update task failed: {}", e)))?
}

fn read_index(dir: &Path) -> CacheResult<DiskIndex> {
    match std::fs::read(dir.join(INDEX_FILE)) {
        Ok(raw) => Ok(parse_index(dir, &raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DiskIndex::default()),
        Err(e) => Err(e.into()),
    }
}

async fn read_index_async(dir: &Path) -> CacheResult<DiskIndex> {
    match tokio::fs::read(dir.join(INDEX_FILE)).await {
        Ok(raw) => Ok(parse_index(dir, &raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DiskIndex::default()),
        Err(e) => Err(e.into()),
    }
}

fn parse_index(dir: &Path, raw: &[u8]) -> DiskIndex {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
        warn!(dir = %dir.display(), error = %e, "Discarding unreadable cache index");
        DiskIndex::default()
    })
}

async fn index_stamp(dir: &Path) -> IndexStamp {
    let meta = tokio::fs::metadata(dir.join(INDEX_FILE)).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Delete entry and temp files the index does not reference.
fn remove_orphans(dir: &Path, index: &DiskIndex) -> usize {
    let known: HashSet<&str> = index.entries.values().map(|e| e.file.as_str()).collect();
    let Ok(listing) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in listing.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_cache_file = path
            .extension()
            .is_some_and(|ext| ext == ENTRY_EXT || ext == TEMP_EXT);
        if !is_cache_file || known.contains(name) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok());
        if age.is_some_and(|age| age >= ORPHAN_GRACE) {
            debug!(file = %name, "Removing orphaned cache file");
            remove_file(dir, name);
            removed += 1;
        }
    }
    removed
}

fn remove_file(dir: &Path, file: &str) {
    if let Err(e) = std::fs::remove_file(dir.join(file)) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(file = %file, error = %e, "Failed to remove cache file");
        }
    }
}

/// Write through a uniquely named temporary sibling and rename into place.
async fn write_atomic(path: &Path, data: &[u8]) -> CacheResult<()> {
    let tmp = path.with_extension(format!("{}.{}", uuid::Uuid::new_v4(), TEMP_EXT));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.path().extension().map_or(false, |x| x == ENTRY_EXT))
                    .unwrap_or(false)
            })
            .count()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).await.unwrap();

        assert!(cache.get("a").await.unwrap().is_none());
        cache.set("a", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().unwrap(), Bytes::from_static(b"hello"));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_bytes, 5);
        assert!((stats.hit_rate() - 50.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).await.unwrap();

        cache.set("a", Bytes::from_static(b"one")).await.unwrap();
        cache.set("a", Bytes::from_static(b"three")).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap().unwrap(), Bytes::from_static(b"three"));
        assert_eq!(bin_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_oversized_value_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 4).await.unwrap();

        cache.set("big", Bytes::from_static(b"too large")).await.unwrap();
        assert!(!cache.contains("big").await);
        assert_eq!(bin_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_hits_do_not_rewrite_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).await.unwrap();
        cache.set("a", Bytes::from_static(b"x")).await.unwrap();

        let before = std::fs::read(dir.path().join(INDEX_FILE)).unwrap();
        for _ in 0..3 {
            cache.get("a").await.unwrap();
        }
        assert_eq!(std::fs::read(dir.path().join(INDEX_FILE)).unwrap(), before);

        cache.flush().await.unwrap();
        let index: DiskIndex =
            serde_json::from_slice(&std::fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index.entries["a"].hits, 3);
    }

    #[test]
    fn test_merge_hits_keeps_access_order() {
        let mut index = DiskIndex::default();
        for key in ["a", "b"] {
            let now = index.tick();
            index.entries.insert(
                key.to_string(),
                IndexEntry {
                    file: format!("{}.bin", key),
                    size: 1,
                    hits: 0,
                    last_access: now,
                },
            );
        }
        let pending = HashMap::from([
            ("a".to_string(), PendingHit { hits: 2, order: 7 }),
            ("b".to_string(), PendingHit { hits: 1, order: 3 }),
            ("gone".to_string(), PendingHit { hits: 5, order: 1 }),
        ]);
        index.merge_hits(pending);

        assert_eq!(index.entries["a"].hits, 2);
        assert_eq!(index.entries["b"].hits, 1);
        assert!(index.entries["a"].last_access > index.entries["b"].last_access);
        assert!(!index.entries.contains_key("gone"));
    }
}
