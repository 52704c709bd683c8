//! Dataset access for the tile server.
//!
//! Opening a dataset goes through four steps: the locator is classified
//! ([`Protocol`], [`Engine`]), a [`FilesystemProvider`] turns it into a
//! [`FileSource`], a loader reads it into a [`grid_common::Dataset`], and the
//! [`DatasetOpener`] wraps all of that in a cache-aside lookup against an
//! injected [`dataset_cache::CacheBackend`]. [`CoordinateNormalizer`] then
//! puts a single variable into canonical raster layout.
//!
//! # Example
//!
//! ```ignore
//! let cache = dataset_cache::build_cache_backend(&CacheConfig::from_env()?).await?;
//! let opener = DatasetOpener::new(FilesystemProvider::new(ReaderConfig::from_env()), cache);
//!
//! let ds = opener.open("s3://bucket/sst.zarr", &opener.default_options()).await?;
//! let da = CoordinateNormalizer::normalize(&ds, "sst", Some("2024-01-15"), None)?;
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod filesystem;
pub mod loader;
pub mod normalize;
pub mod open_args;
pub mod opener;
pub mod protocol;

pub use catalog::{VariableCatalog, VariableInfo};
pub use config::{ReaderConfig, S3Config};
pub use engine::Engine;
pub use filesystem::{FileSource, FilesystemProvider};
pub use normalize::CoordinateNormalizer;
pub use open_args::OpenArgs;
pub use opener::DatasetOpener;
pub use protocol::Protocol;

#[cfg(feature = "netcdf")]
pub use loader::silence_hdf5_errors;
