//! Chunked stores read through remote filesystems, and reference manifests
//! with explicit byte ranges.

use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;
use zarrs_storage::{ListableStorageTraits, ReadableStorageTraits, StoreKey};

use dataset_cache::{DiskCache, NoCache};
use dataset_reader::filesystem::store::{into_mapping, Listing, RemoteStore};
use dataset_reader::filesystem::RemoteFileSystem;
use dataset_reader::loader;
use dataset_reader::{
    DatasetOpener, Engine, FileSource, FilesystemProvider, OpenArgs, Protocol, ReaderConfig,
};
use grid_common::{Dataset, OpenOptions};
use test_utils::{consolidate, sst_cube, write_reference_manifest, write_zarr_v2};

const LOCATOR: &str = "s3://bucket/data/sst.zarr";

/// Upload every file of a local store under `data/sst.zarr/`.
async fn upload(store: &InMemory, root: &Path) {
    for entry in WalkDir::new(root) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap().to_str().unwrap().replace('\\', "/");
        let data = Bytes::from(std::fs::read(entry.path()).unwrap());
        store
            .put(&ObjectPath::from(format!("data/sst.zarr/{}", rel)), data.into())
            .await
            .unwrap();
    }
}

async fn in_memory_cube() -> Arc<InMemory> {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("sst.zarr");
    write_zarr_v2(&local, None, &sst_cube()).unwrap();
    consolidate(&local).unwrap();

    let store = Arc::new(InMemory::new());
    upload(&store, &local).await;
    store
}

fn remote_fs(store: Arc<InMemory>, cache: Option<Arc<DiskCache>>) -> RemoteFileSystem {
    RemoteFileSystem::new(Protocol::S3, LOCATOR, store, "data/sst.zarr", cache)
}

fn assert_sst(ds: &Dataset) {
    assert_eq!(
        ds.variable("sst").unwrap().values,
        sst_cube().variable("sst").unwrap().values
    );
    assert_eq!(ds.dim_len("lon"), Some(8));
}

async fn load(source: FileSource, consolidated: bool) -> Dataset {
    let opts = OpenOptions::default().with_consolidated(consolidated);
    let args = OpenArgs::build(&opts, Engine::ChunkedStore);
    loader::load(LOCATOR, source, &args).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_direct_mapping_reads_an_object_store() {
    let fs = remote_fs(in_memory_cube().await, None);
    let mapping = fs.mapping();

    let keys: Vec<String> = mapping.list().unwrap().iter().map(|k| k.to_string()).collect();
    assert!(keys.contains(&"sst/0.0.0".to_string()));
    assert!(keys.contains(&".zmetadata".to_string()));

    assert_sst(&load(FileSource::Mapping(mapping), false).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_consolidated_listing_enumerates_chunks() {
    let store = in_memory_cube().await;
    // Chunk keys come from the metadata, so a chunk never written is listed
    // but reads back as absent.
    store
        .delete(&ObjectPath::from("data/sst.zarr/anom/0.0.0"))
        .await
        .unwrap();
    let mapping = into_mapping(RemoteStore::new(
        Arc::new(remote_fs(store, None)),
        Listing::Consolidated,
    ));

    let keys: Vec<String> = mapping.list().unwrap().iter().map(|k| k.to_string()).collect();
    for expected in [".zmetadata", ".zgroup", "sst/.zarray", "sst/0.0.0", "time/0", "anom/0.0.0"] {
        assert!(keys.contains(&expected.to_string()), "missing {}", expected);
    }
    assert!(mapping.get(&StoreKey::new("anom/0.0.0").unwrap()).unwrap().is_none());

    let ds = load(FileSource::Mapping(mapping), true).await;
    assert_sst(&ds);
    // The missing chunk is all fill value.
    assert!(ds.variable("anom").unwrap().values.get_f64(0).unwrap().is_nan());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cached_store_fetches_per_key_and_serves_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(DiskCache::open(dir.path(), 16 << 20).await.unwrap());
    let store = in_memory_cube().await;

    let mapping = into_mapping(RemoteStore::new(
        Arc::new(remote_fs(store.clone(), Some(cache.clone()))),
        Listing::Objects,
    ));
    // Constructing the mapping fetches nothing.
    assert_eq!(cache.stats().await.entries, 0);

    assert_sst(&load(FileSource::Mapping(mapping), true).await);
    assert!(cache.contains(&format!("s3::{}::sst/0.0.0::*", LOCATOR)).await);
    assert!(cache.contains(&format!("s3::{}::.zmetadata::*", LOCATOR)).await);

    // A repeat read is served from the cache without adding an entry.
    let before = cache.stats().await;
    let mapping = into_mapping(RemoteStore::new(
        Arc::new(remote_fs(store.clone(), Some(cache.clone()))),
        Listing::Objects,
    ));
    assert!(mapping.get(&StoreKey::new("ice/0.0.0").unwrap()).unwrap().is_some());
    let after = cache.stats().await;
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.hits, before.hits + 1);

    // With the source emptied, the cached keys still open the store.
    let paths: Vec<ObjectPath> = store
        .list(None)
        .map(|meta| meta.unwrap().location)
        .collect()
        .await;
    for path in paths {
        store.delete(&path).await.unwrap();
    }
    let mapping = into_mapping(RemoteStore::new(
        Arc::new(remote_fs(store, Some(cache))),
        Listing::Objects,
    ));
    assert_sst(&load(FileSource::Mapping(mapping), true).await);
}

/// Rewrite a templated manifest as version 0 with literal paths.
fn explicit_ranges(manifest: &Path) -> Value {
    let doc: Value = serde_json::from_slice(&std::fs::read(manifest).unwrap()).unwrap();
    let template = doc["templates"]["u"].as_str().unwrap();
    let blob = template.strip_prefix("file://").unwrap().to_string();

    let mut refs = doc["refs"].as_object().unwrap().clone();
    for value in refs.values_mut() {
        if let Value::Array(parts) = value {
            parts[0] = json!(blob);
        }
    }
    Value::Object(refs)
}

#[tokio::test]
async fn test_reference_manifest_with_explicit_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let templated = write_reference_manifest(dir.path(), &sst_cube()).unwrap();
    let doc = explicit_ranges(&templated);
    let range = doc["sst/0.0.0"].as_array().unwrap();
    assert_eq!(range.len(), 3);
    assert!(range[0].as_str().unwrap().ends_with("chunks.bin"));

    let manifest = dir.path().join("explicit.json");
    std::fs::write(&manifest, serde_json::to_vec(&doc).unwrap()).unwrap();

    let opener = DatasetOpener::new(
        FilesystemProvider::new(ReaderConfig::default()),
        Arc::new(NoCache),
    );
    let opts = OpenOptions::default().with_reference(true);
    let ds = opener.open(manifest.to_str().unwrap(), &opts).await.unwrap();
    assert_sst(&ds);
    assert_eq!(
        ds.variable("ice").unwrap().values,
        sst_cube().variable("ice").unwrap().values
    );

    // Ranges are read when the store is loaded; a short blob fails the open.
    let blob = dir.path().join("chunks.bin");
    let len = std::fs::metadata(&blob).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&blob)
        .unwrap()
        .set_len(len / 2)
        .unwrap();
    let err = opener
        .open(manifest.to_str().unwrap(), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "OpenFailure");
}
