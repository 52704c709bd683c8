//! Reference manifests (kerchunk JSON) pointing into a local blob file.
//!
//! Coordinates are embedded inline as base64, data variable chunks are
//! byte ranges into `chunks.bin`, addressed through a `{{u}}` template.

use base64::Engine as _;
use grid_common::Dataset;
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};

use crate::zarr_store::{array_attributes, array_metadata, attrs_to_json, chunk_bytes, chunk_key};

pub const MANIFEST_FILE: &str = "refs.json";
pub const BLOB_FILE: &str = "chunks.bin";

/// Write a version 1 manifest for `ds` into `dir` and return its path.
pub fn write_reference_manifest(dir: &Path, ds: &Dataset) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let blob_path = dir.join(BLOB_FILE);

    let mut refs = Map::new();
    refs.insert(".zgroup".into(), json!(json!({ "zarr_format": 2 }).to_string()));
    refs.insert(".zattrs".into(), json!(attrs_to_json(&ds.attrs).to_string()));

    let mut blob = Vec::new();
    for var in &ds.coords {
        let chunk = chunk_bytes(var);
        insert_metadata(&mut refs, var);
        let encoded = base64::engine::general_purpose::STANDARD.encode(chunk);
        refs.insert(
            format!("{}/{}", var.name, chunk_key(var)),
            json!(format!("base64:{}", encoded)),
        );
    }
    for var in &ds.data_vars {
        let chunk = chunk_bytes(var);
        insert_metadata(&mut refs, var);
        refs.insert(
            format!("{}/{}", var.name, chunk_key(var)),
            json!(["{{u}}", blob.len(), chunk.len()]),
        );
        blob.extend_from_slice(&chunk);
    }
    std::fs::write(&blob_path, &blob)?;

    let manifest = json!({
        "version": 1,
        "templates": { "u": format!("file://{}", blob_path.display()) },
        "refs": refs,
    });
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    Ok(path)
}

fn insert_metadata(refs: &mut Map<String, Value>, var: &grid_common::Variable) {
    refs.insert(
        format!("{}/.zarray", var.name),
        json!(array_metadata(var).to_string()),
    );
    refs.insert(
        format!("{}/.zattrs", var.name),
        json!(array_attributes(var).to_string()),
    );
}
