//! Legacy grid loader (netCDF and HDF5 files) using the native netcdf library.
//!
//! Remote files arrive as bytes and are spooled to a temporary file first,
//! on `/dev/shm` when it is writable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::debug;

use grid_common::{AttrValue, Attributes, ArrayValues, Dataset, DatasetError, DatasetResult, Variable};

use crate::open_args::OpenArgs;

/// Silence HDF5's error stack printing.
///
/// The HDF5 C library prints a full error stack to stderr whenever an
/// optional attribute lookup misses, even though the caller handles it.
/// Call early in `main`, before any file is opened.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: null handlers are the documented way to disable automatic printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Spool `data` to a temporary file and load it.
pub(super) fn load_bytes(locator: &str, data: &[u8], args: &OpenArgs) -> DatasetResult<Dataset> {
    let mut spool = tempfile::Builder::new()
        .prefix("dataset_")
        .suffix(".nc")
        .tempfile_in(spool_dir())
        .map_err(|e| DatasetError::open_failed(locator, e))?;
    spool
        .write_all(data)
        .and_then(|_| spool.flush())
        .map_err(|e| DatasetError::open_failed(locator, e))?;

    debug!(locator = %locator, spool = %spool.path().display(), size = data.len(), "Spooled legacy grid file");
    // The spool file is removed when `spool` drops at the end of this call.
    load_path(locator, spool.path(), args)
}

pub(super) fn load_path(locator: &str, path: &Path, args: &OpenArgs) -> DatasetResult<Dataset> {
    silence_hdf5_errors();

    let file = netcdf::open(path).map_err(|e| DatasetError::open_failed(locator, e))?;

    let (variables, attrs) = match args.group {
        Some(group) => {
            let name = group.to_string();
            let Some(nc_group) = file
                .group(&name)
                .map_err(|e| DatasetError::open_failed(locator, e))?
            else {
                return Err(DatasetError::GroupNotFound {
                    locator: locator.to_string(),
                    group: name,
                });
            };
            read_group(locator, nc_group.variables(), nc_group.attributes())
        }
        None => read_group(locator, file.variables(), file.attributes()),
    };

    super::assemble(locator, variables, attrs, args.decode_times)
}

fn read_group<'f>(
    locator: &str,
    variables: impl Iterator<Item = netcdf::Variable<'f>>,
    attributes: impl Iterator<Item = netcdf::Attribute<'f>>,
) -> (Vec<Variable>, Attributes) {
    let attrs = read_attributes(attributes);

    let mut out = Vec::new();
    for var in variables {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

        // Character and string variables are not gridded data.
        let values: Vec<f64> = match var.get_values(..) {
            Ok(values) => values,
            Err(e) => {
                debug!(locator = %locator, variable = %name, error = %e, "Skipping unreadable variable");
                continue;
            }
        };

        match Variable::new(name.clone(), dims, shape, ArrayValues::Float(values)) {
            Ok(mut variable) => {
                variable.attrs = read_attributes(var.attributes());
                out.push(variable);
            }
            Err(e) => debug!(locator = %locator, variable = %name, error = %e, "Skipping variable"),
        }
    }
    (out, attrs)
}

fn read_attributes<'f>(attributes: impl Iterator<Item = netcdf::Attribute<'f>>) -> Attributes {
    attributes
        .filter_map(|attr| {
            let value = attr.value().ok().and_then(attr_value)?;
            Some((attr.name().to_string(), value))
        })
        .collect()
}

fn attr_value(value: netcdf::AttributeValue) -> Option<AttrValue> {
    use netcdf::AttributeValue as V;

    let attr = match value {
        V::Str(s) => AttrValue::Text(s),
        V::Strs(s) => AttrValue::Texts(s),
        V::Double(v) => AttrValue::Float(v),
        V::Doubles(v) => AttrValue::Floats(v),
        V::Float(v) => AttrValue::Float(f64::from(v)),
        V::Floats(v) => AttrValue::Floats(v.into_iter().map(f64::from).collect()),
        V::Schar(v) => AttrValue::Int(i64::from(v)),
        V::Schars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Uchar(v) => AttrValue::Int(i64::from(v)),
        V::Uchars(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Short(v) => AttrValue::Int(i64::from(v)),
        V::Shorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Ushort(v) => AttrValue::Int(i64::from(v)),
        V::Ushorts(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Int(v) => AttrValue::Int(i64::from(v)),
        V::Ints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Uint(v) => AttrValue::Int(i64::from(v)),
        V::Uints(v) => AttrValue::Ints(v.into_iter().map(i64::from).collect()),
        V::Longlong(v) => AttrValue::Int(v),
        V::Longlongs(v) => AttrValue::Ints(v),
        V::Ulonglong(v) => AttrValue::Int(v as i64),
        V::Ulonglongs(v) => AttrValue::Ints(v.into_iter().map(|x| x as i64).collect()),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(attr)
}

/// Directory for spooled files: `/dev/shm` when writable, else the system temp dir.
fn spool_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            let marker = shm.join(format!(".dataset_writable_{}", std::process::id()));
            if std::fs::write(&marker, b"").is_ok() {
                let _ = std::fs::remove_file(&marker);
                return shm.to_path_buf();
            }
        }
    }

    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spool_dir_exists() {
        assert!(spool_dir().is_dir());
    }

    #[test]
    fn test_attr_value_conversion() {
        assert_eq!(
            attr_value(netcdf::AttributeValue::Short(-32767)),
            Some(AttrValue::Int(-32767))
        );
        assert_eq!(
            attr_value(netcdf::AttributeValue::Str("degrees_north".into())),
            Some(AttrValue::from("degrees_north"))
        );
        assert_eq!(
            attr_value(netcdf::AttributeValue::Floats(vec![0.5, 1.5])),
            Some(AttrValue::Floats(vec![0.5, 1.5]))
        );
    }

    #[test]
    fn test_garbage_bytes_fail_to_open() {
        let args = OpenArgs::build(
            &grid_common::OpenOptions::default(),
            crate::engine::Engine::LegacyGrid,
        );
        let err = load_bytes("mem://garbage.nc", b"not a netcdf file", &args).unwrap_err();
        assert_eq!(err.kind(), "OpenFailure");
    }
}
