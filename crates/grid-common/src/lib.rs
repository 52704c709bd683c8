//! Common types shared by the dataset cache, the dataset reader and the CLI.

pub mod crs;
pub mod dataset;
pub mod error;
pub mod options;
pub mod time;

pub use crs::Crs;
pub use dataset::{ArrayValues, AttrValue, Attributes, DataArray, Dataset, Dimension, Variable};
pub use error::{DatasetError, DatasetResult};
pub use options::{GroupIndex, OpenOptions};
