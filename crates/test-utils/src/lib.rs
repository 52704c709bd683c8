//! Shared test utilities for the dataset access workspace.
//!
//! - synthetic datasets with position-encoding values
//! - Zarr v2 and reference-manifest writers for those datasets
//! - in-process memcached and Redis stand-ins
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod datasets;
pub mod memcached;
pub mod redis;
pub mod reference;
pub mod zarr_store;

pub use datasets::*;
pub use memcached::{FakeMemcached, FakeMode};
pub use redis::FakeRedis;
pub use reference::write_reference_manifest;
pub use zarr_store::{consolidate, write_zarr_v2};
