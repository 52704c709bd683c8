//! Chunked-store loader built on zarrs.
//!
//! Metadata comes from consolidated `.zmetadata` when requested and
//! present, otherwise from listing the store. Both Zarr v2 (`.zarray`,
//! `.zattrs`, `_ARRAY_DIMENSIONS`) and v3 (`zarr.json`) arrays are read.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_storage::{ReadableListableStorage, StoreKey, StorePrefix};

use grid_common::{AttrValue, Attributes, ArrayValues, Dataset, DatasetError, DatasetResult, Variable};

use super::decode::json_attributes;
use crate::open_args::OpenArgs;

const CONSOLIDATED_KEY: &str = ".zmetadata";
const METADATA_FILES: [&str; 4] = [".zgroup", ".zattrs", ".zarray", "zarr.json"];

/// An array found in the store metadata, before its values are read.
struct ArrayNode {
    name: String,
    dims: Vec<String>,
    attrs: Attributes,
}

pub(super) fn load(
    locator: &str,
    storage: ReadableListableStorage,
    args: &OpenArgs,
) -> DatasetResult<Dataset> {
    let prefix = match args.group {
        Some(group) => format!("{}/", group),
        None => String::new(),
    };

    let metadata = read_metadata(locator, &storage, &prefix, args.use_consolidated())?;
    if !metadata.keys().any(|k| k.starts_with(&prefix)) {
        return Err(match args.group {
            Some(group) => DatasetError::GroupNotFound {
                locator: locator.to_string(),
                group: group.to_string(),
            },
            None => DatasetError::open_failed(locator, "no Zarr metadata found"),
        });
    }

    let group_attrs = group_attributes(&metadata, &prefix);
    let nodes = array_nodes(&metadata, &prefix);
    debug!(locator = %locator, group = %prefix, arrays = nodes.len(), "Reading chunked store");

    let mut variables = Vec::with_capacity(nodes.len());
    for node in nodes {
        let path = format!("/{}{}", prefix, node.name);
        let array = Array::open(storage.clone(), &path)
            .map_err(|e| DatasetError::open_failed(locator, format!("{}: {}", node.name, e)))?;
        let shape: Vec<usize> = array.shape().iter().map(|&n| n as usize).collect();
        let Some(values) = read_values(&array)
            .map_err(|e| DatasetError::open_failed(locator, format!("{}: {}", node.name, e)))?
        else {
            debug!(
                locator = %locator,
                array = %node.name,
                data_type = %array.data_type(),
                "Skipping array with unsupported data type"
            );
            continue;
        };

        let dims = if node.dims.len() == shape.len() {
            node.dims
        } else {
            (0..shape.len()).map(|i| format!("dim_{}", i)).collect()
        };
        let mut var = Variable::new(node.name, dims, shape, values)
            .map_err(|e| DatasetError::open_failed(locator, e))?;
        var.attrs = node.attrs;
        variables.push(var);
    }

    super::assemble(locator, variables, group_attrs, args.decode_times)
}

/// Collect every metadata document in the store, keyed by store key.
fn read_metadata(
    locator: &str,
    storage: &ReadableListableStorage,
    prefix: &str,
    consolidated: bool,
) -> DatasetResult<BTreeMap<String, Value>> {
    if consolidated {
        if let Some(doc) = get_json(locator, storage, CONSOLIDATED_KEY)? {
            if let Some(Value::Object(entries)) = doc.get("metadata") {
                return Ok(entries.clone().into_iter().collect());
            }
            debug!(locator = %locator, "Consolidated metadata has no entries; listing store");
        } else {
            debug!(locator = %locator, "No consolidated metadata; listing store");
        }
    }

    let keys = if prefix.is_empty() {
        storage.list()
    } else {
        let store_prefix =
            StorePrefix::new(prefix).map_err(|e| DatasetError::open_failed(locator, e))?;
        storage.list_prefix(&store_prefix)
    }
    .map_err(|e| DatasetError::open_failed(locator, e))?;

    let mut metadata = BTreeMap::new();
    for key in keys {
        let name = key.as_str().rsplit('/').next().unwrap_or_default();
        if !METADATA_FILES.contains(&name) {
            continue;
        }
        if let Some(doc) = get_json(locator, storage, key.as_str())? {
            metadata.insert(key.as_str().to_string(), doc);
        }
    }
    Ok(metadata)
}

fn get_json(
    locator: &str,
    storage: &ReadableListableStorage,
    key: &str,
) -> DatasetResult<Option<Value>> {
    let store_key = StoreKey::new(key).map_err(|e| DatasetError::open_failed(locator, e))?;
    let Some(raw) = storage
        .get(&store_key)
        .map_err(|e| DatasetError::open_failed(locator, e))?
    else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| DatasetError::open_failed(locator, format!("{}: {}", key, e)))
}

fn group_attributes(metadata: &BTreeMap<String, Value>, prefix: &str) -> Attributes {
    if let Some(Value::Object(attrs)) = metadata.get(&format!("{}.zattrs", prefix)) {
        return json_attributes(attrs);
    }
    match metadata
        .get(&format!("{}zarr.json", prefix))
        .and_then(|doc| doc.get("attributes"))
    {
        Some(Value::Object(attrs)) => json_attributes(attrs),
        _ => Attributes::new(),
    }
}

/// Arrays directly under `prefix`, sorted by name.
fn array_nodes(metadata: &BTreeMap<String, Value>, prefix: &str) -> Vec<ArrayNode> {
    let mut nodes = Vec::new();
    for (key, doc) in metadata {
        let Some(rel) = key.strip_prefix(prefix) else {
            continue;
        };
        let Some((name, file)) = rel.split_once('/') else {
            continue;
        };
        if name.is_empty() || file.contains('/') {
            continue;
        }
        match file {
            ".zarray" => {
                let attrs = metadata
                    .get(&format!("{}{}/.zattrs", prefix, name))
                    .and_then(Value::as_object);
                nodes.push(v2_node(name, doc, attrs));
            }
            "zarr.json" if doc.get("node_type").and_then(Value::as_str) == Some("array") => {
                nodes.push(v3_node(name, doc));
            }
            _ => {}
        }
    }
    nodes
}

fn v2_node(name: &str, zarray: &Value, zattrs: Option<&Map<String, Value>>) -> ArrayNode {
    let mut raw = zattrs.cloned().unwrap_or_default();
    let dims = raw
        .remove("_ARRAY_DIMENSIONS")
        .map(|v| string_list(&v))
        .unwrap_or_default();
    let mut attrs = json_attributes(&raw);

    if !attrs.contains_key("_FillValue") {
        if let Some(fill) = zarray.get("fill_value").and_then(super::decode::json_float) {
            if !fill.is_nan() {
                attrs.insert("_FillValue".to_string(), AttrValue::Float(fill));
            }
        }
    }

    ArrayNode {
        name: name.to_string(),
        dims,
        attrs,
    }
}

fn v3_node(name: &str, doc: &Value) -> ArrayNode {
    let dims = doc
        .get("dimension_names")
        .map(string_list)
        .unwrap_or_default();
    let attrs = match doc.get("attributes") {
        Some(Value::Object(attrs)) => json_attributes(attrs),
        _ => Attributes::new(),
    };
    ArrayNode {
        name: name.to_string(),
        dims,
        attrs,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Read the whole array. `Ok(None)` when its data type has no [`ArrayValues`] form.
fn read_values<S>(array: &Array<S>) -> Result<Option<ArrayValues>, String>
where
    S: ?Sized + zarrs_storage::ReadableStorageTraits + 'static,
{
    let subset = ArraySubset::new_with_start_shape(vec![0; array.shape().len()], array.shape().to_vec())
        .map_err(|e| e.to_string())?;

    macro_rules! elements {
        ($t:ty) => {
            array
                .retrieve_array_subset_elements::<$t>(&subset)
                .map_err(|e| e.to_string())?
        };
    }

    let values = match array.data_type() {
        DataType::Float64 => ArrayValues::Float(elements!(f64)),
        DataType::Float32 => ArrayValues::Float(elements!(f32).into_iter().map(f64::from).collect()),
        DataType::Int64 => ArrayValues::Int(elements!(i64)),
        DataType::Int32 => ArrayValues::Int(elements!(i32).into_iter().map(i64::from).collect()),
        DataType::Int16 => ArrayValues::Int(elements!(i16).into_iter().map(i64::from).collect()),
        DataType::Int8 => ArrayValues::Int(elements!(i8).into_iter().map(i64::from).collect()),
        DataType::UInt64 => unsigned_values(elements!(u64)),
        DataType::UInt32 => ArrayValues::Int(elements!(u32).into_iter().map(i64::from).collect()),
        DataType::UInt16 => ArrayValues::Int(elements!(u16).into_iter().map(i64::from).collect()),
        DataType::UInt8 => ArrayValues::Int(elements!(u8).into_iter().map(i64::from).collect()),
        DataType::Bool => ArrayValues::Int(elements!(bool).into_iter().map(i64::from).collect()),
        DataType::String => ArrayValues::Text(elements!(String)),
        _ => return Ok(None),
    };
    Ok(Some(values))
}

/// uint64 values stay integers unless one of them does not fit in an `i64`.
fn unsigned_values(values: Vec<u64>) -> ArrayValues {
    match values.iter().map(|&v| i64::try_from(v)).collect::<Result<Vec<_>, _>>() {
        Ok(ints) => ArrayValues::Int(ints),
        Err(_) => ArrayValues::Float(values.into_iter().map(|v| v as f64).collect()),
    }
}
