//! Dataset loaders for chunked stores and legacy grid files.
//!
//! Loading is synchronous (zarrs and the netcdf library both block), so it
//! runs on the blocking pool. The file source and every handle opened from
//! it are dropped before [`load`] returns, on success and on error.

pub(crate) mod decode;
#[cfg(feature = "netcdf")]
mod legacy;
mod zarr;

#[cfg(feature = "netcdf")]
pub use legacy::silence_hdf5_errors;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use zarrs_filesystem::FilesystemStore;

use grid_common::{AttrValue, Attributes, Dataset, DatasetError, DatasetResult, Variable};

use crate::engine::Engine;
use crate::filesystem::FileSource;
use crate::open_args::OpenArgs;

/// Attributes naming other variables that belong with a data variable.
const COORDINATE_ATTRS: [&str; 3] = ["coordinates", "grid_mapping", "bounds"];

/// Open `source` with the engine chosen in `args`.
pub async fn load(locator: &str, source: FileSource, args: &OpenArgs) -> DatasetResult<Dataset> {
    let locator = locator.to_string();
    let args = args.clone();
    tokio::task::spawn_blocking(move || load_blocking(&locator, source, &args))
        .await
        .map_err(|e| DatasetError::Internal(format!("loader task failed: {}", e)))?
}

fn load_blocking(locator: &str, source: FileSource, args: &OpenArgs) -> DatasetResult<Dataset> {
    debug!(locator = %locator, engine = %args.engine, source = source.kind(), "Loading dataset");
    match (args.engine, source) {
        (Engine::ChunkedStore, FileSource::Mapping(storage)) => zarr::load(locator, storage, args),
        (Engine::ChunkedStore, FileSource::Path(path)) => {
            let store = FilesystemStore::new(&path)
                .map_err(|e| DatasetError::open_failed(locator, e))?;
            zarr::load(locator, Arc::new(store), args)
        }
        (Engine::ChunkedStore, FileSource::Stream(_)) => Err(DatasetError::Internal(
            "chunked stores are read through a key mapping, not a byte stream".to_string(),
        )),
        (Engine::LegacyGrid, source) => load_legacy(locator, source, args),
    }
}

#[cfg(feature = "netcdf")]
fn load_legacy(locator: &str, source: FileSource, args: &OpenArgs) -> DatasetResult<Dataset> {
    match source {
        FileSource::Path(path) => legacy::load_path(locator, &path, args),
        FileSource::Stream(data) => legacy::load_bytes(locator, &data, args),
        FileSource::Mapping(_) => Err(DatasetError::Internal(
            "legacy grid files are read from a path or a byte stream".to_string(),
        )),
    }
}

#[cfg(not(feature = "netcdf"))]
fn load_legacy(locator: &str, _source: FileSource, _args: &OpenArgs) -> DatasetResult<Dataset> {
    Err(DatasetError::Configuration(format!(
        "{} is a legacy grid file but this build has no netcdf support",
        locator
    )))
}

/// Decode raw variables and split them into coordinates and data variables.
///
/// Coordinates are the 1-D variables named after their dimension plus any
/// variable named by another's `coordinates`, `grid_mapping` or `bounds`.
pub(crate) fn assemble(
    locator: &str,
    variables: Vec<Variable>,
    attrs: Attributes,
    decode_times: bool,
) -> DatasetResult<Dataset> {
    let variables: Vec<Variable> = variables
        .into_iter()
        .map(|v| decode::decode_variable(v, decode_times))
        .collect();

    let mut coord_names: BTreeSet<String> = variables
        .iter()
        .filter(|v| v.dims.len() == 1 && v.dims[0] == v.name)
        .map(|v| v.name.clone())
        .collect();
    for var in &variables {
        for attr in COORDINATE_ATTRS {
            if let Some(AttrValue::Text(names)) = var.attr(attr) {
                coord_names.extend(names.split_whitespace().map(String::from));
            }
        }
    }

    let mut ds = Dataset::new();
    ds.attrs = attrs;
    let (coords, data_vars): (Vec<_>, Vec<_>) = variables
        .into_iter()
        .partition(|v| coord_names.contains(&v.name));
    for var in coords {
        ds.add_coord(var)
            .map_err(|e| DatasetError::open_failed(locator, e))?;
    }
    for var in data_vars {
        ds.add_data_var(var)
            .map_err(|e| DatasetError::open_failed(locator, e))?;
    }
    Ok(ds)
}
