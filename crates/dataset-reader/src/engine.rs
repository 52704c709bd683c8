//! Dataset engine selection by file suffix.

use std::fmt;

/// Suffixes of self-contained legacy grid files, compared case-insensitively.
const LEGACY_SUFFIXES: &[&str] = &[".nc", ".nc4", ".netcdf", ".cdf", ".h5", ".hdf5", ".he5"];

/// How a dataset is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// A single NetCDF/HDF5 file read as a byte stream.
    LegacyGrid,
    /// A chunked array store (Zarr) read through a key mapping.
    ChunkedStore,
}

impl Engine {
    pub fn select(locator: &str) -> Self {
        let path = locator
            .split(['?', '#'])
            .next()
            .unwrap_or(locator)
            .trim_end_matches('/')
            .to_ascii_lowercase();

        if LEGACY_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            Engine::LegacyGrid
        } else {
            Engine::ChunkedStore
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::LegacyGrid => "legacy-grid",
            Engine::ChunkedStore => "chunked-store",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
