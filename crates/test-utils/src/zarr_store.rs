//! Writing [`Dataset`]s as Zarr v2 stores on the local filesystem.
//!
//! Every array is a single uncompressed little-endian chunk. Integer
//! arrays use `i64::MIN` as their fill value. Text arrays are object
//! arrays with a `vlen-utf8` filter, the layout zarr-python 2 writes. Time
//! coordinates are written as int64 seconds with CF units so a decoding
//! reader turns them back into timestamps.

use grid_common::{ArrayValues, AttrValue, Attributes, Dataset, Variable};
use serde_json::{json, Map, Value};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

pub const TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

const METADATA_FILES: [&str; 4] = [".zgroup", ".zattrs", ".zarray", "zarr.json"];

/// Write `ds` under `root`, or under `root/<group>` when a group is given.
pub fn write_zarr_v2(root: &Path, group: Option<&str>, ds: &Dataset) -> io::Result<()> {
    std::fs::create_dir_all(root)?;
    if !root.join(".zgroup").exists() {
        write_json(&root.join(".zgroup"), &json!({ "zarr_format": 2 }))?;
    }

    let group_dir = match group {
        Some(g) => root.join(g),
        None => root.to_path_buf(),
    };
    std::fs::create_dir_all(&group_dir)?;
    write_json(&group_dir.join(".zgroup"), &json!({ "zarr_format": 2 }))?;
    write_json(&group_dir.join(".zattrs"), &attrs_to_json(&ds.attrs))?;

    for var in ds.coords.iter().chain(ds.data_vars.iter()) {
        let chunk = chunk_bytes(var);
        let dir = group_dir.join(&var.name);
        std::fs::create_dir_all(&dir)?;
        write_json(&dir.join(".zarray"), &array_metadata(var))?;
        write_json(&dir.join(".zattrs"), &array_attributes(var))?;
        std::fs::write(dir.join(chunk_key(var)), chunk)?;
    }
    Ok(())
}

/// Write a `.zmetadata` document covering every metadata file under `root`.
pub fn consolidate(root: &Path) -> io::Result<()> {
    let mut metadata = Map::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file() || !METADATA_FILES.contains(&name.as_ref()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let doc: Value = serde_json::from_slice(&std::fs::read(entry.path())?)?;
        metadata.insert(rel, doc);
    }

    write_json(
        &root.join(".zmetadata"),
        &json!({ "metadata": metadata, "zarr_consolidated_format": 1 }),
    )
}

/// `.zarray` document for a single-chunk array.
pub fn array_metadata(var: &Variable) -> Value {
    let (dtype, fill, filters) = match var.values {
        ArrayValues::Float(_) => ("<f8", json!("NaN"), Value::Null),
        ArrayValues::Text(_) => ("|O", json!(""), json!([{ "id": "vlen-utf8" }])),
        _ => ("<i8", json!(i64::MIN), Value::Null),
    };
    let chunks: Vec<usize> = var.shape.iter().map(|&n| n.max(1)).collect();
    json!({
        "zarr_format": 2,
        "shape": var.shape,
        "chunks": chunks,
        "dtype": dtype,
        "compressor": null,
        "fill_value": fill,
        "filters": filters,
        "order": "C",
    })
}

/// `.zattrs` document: the variable's attributes plus `_ARRAY_DIMENSIONS`.
pub fn array_attributes(var: &Variable) -> Value {
    let mut attrs = attrs_to_json(&var.attrs);
    if let Value::Object(map) = &mut attrs {
        map.insert("_ARRAY_DIMENSIONS".into(), json!(var.dims));
        if matches!(var.values, ArrayValues::Time(_)) {
            map.insert("units".into(), json!(TIME_UNITS));
        }
    }
    attrs
}

/// Key of the only chunk, relative to the array directory.
pub fn chunk_key(var: &Variable) -> String {
    if var.shape.is_empty() {
        "0".to_string()
    } else {
        vec!["0"; var.shape.len()].join(".")
    }
}

/// Raw chunk bytes.
///
/// Text uses the vlen layout: a `u32` item count, then each item as a
/// `u32` byte length followed by its UTF-8 bytes, all little-endian.
pub fn chunk_bytes(var: &Variable) -> Vec<u8> {
    match &var.values {
        ArrayValues::Float(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ArrayValues::Int(v) | ArrayValues::Time(v) => {
            v.iter().flat_map(|x| x.to_le_bytes()).collect()
        }
        ArrayValues::Text(v) => {
            let mut out = (v.len() as u32).to_le_bytes().to_vec();
            for item in v {
                out.extend_from_slice(&(item.len() as u32).to_le_bytes());
                out.extend_from_slice(item.as_bytes());
            }
            out
        }
    }
}

pub fn attrs_to_json(attrs: &Attributes) -> Value {
    let map: Map<String, Value> = attrs
        .iter()
        .map(|(k, v)| {
            let value = match v {
                AttrValue::Text(s) => json!(s),
                AttrValue::Texts(s) => json!(s),
                AttrValue::Float(f) => json!(f),
                AttrValue::Floats(f) => json!(f),
                AttrValue::Int(i) => json!(i),
                AttrValue::Ints(i) => json!(i),
            };
            (k.clone(), value)
        })
        .collect();
    Value::Object(map)
}

fn write_json(path: &Path, doc: &Value) -> io::Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::sst_cube;

    #[test]
    fn test_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_zarr_v2(dir.path(), None, &sst_cube()).unwrap();

        assert!(dir.path().join(".zgroup").exists());
        assert!(dir.path().join("sst/.zarray").exists());
        assert!(dir.path().join("time/0").exists());
        let chunk = std::fs::read(dir.path().join("sst/0.0.0")).unwrap();
        assert_eq!(chunk.len(), 3 * 4 * 8 * 8);
    }

    #[test]
    fn test_text_chunk_layout() {
        let var = Variable::coord(
            "station",
            ArrayValues::Text(vec!["ab".into(), "".into(), "xyz".into()]),
        );
        let chunk = chunk_bytes(&var);
        assert_eq!(&chunk[..4], &3u32.to_le_bytes());
        assert_eq!(&chunk[4..8], &2u32.to_le_bytes());
        assert_eq!(&chunk[8..10], b"ab");
        assert_eq!(&chunk[10..14], &0u32.to_le_bytes());
        assert_eq!(&chunk[14..18], &3u32.to_le_bytes());
        assert_eq!(&chunk[18..], b"xyz");

        let meta = array_metadata(&var);
        assert_eq!(meta["dtype"], json!("|O"));
        assert_eq!(meta["filters"], json!([{ "id": "vlen-utf8" }]));
    }

    #[test]
    fn test_consolidate_collects_groups() {
        let dir = tempfile::tempdir().unwrap();
        write_zarr_v2(dir.path(), Some("0"), &sst_cube()).unwrap();
        write_zarr_v2(dir.path(), Some("1"), &sst_cube()).unwrap();
        consolidate(dir.path()).unwrap();

        let raw = std::fs::read(dir.path().join(".zmetadata")).unwrap();
        let doc: Value = serde_json::from_slice(&raw).unwrap();
        let metadata = doc["metadata"].as_object().unwrap();
        assert!(metadata.contains_key(".zgroup"));
        assert!(metadata.contains_key("1/sst/.zarray"));
        assert_eq!(
            metadata["0/time/.zattrs"]["_ARRAY_DIMENSIONS"],
            json!(["time"])
        );
    }
}
