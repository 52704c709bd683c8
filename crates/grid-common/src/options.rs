//! Per-request dataset open options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DatasetError;

/// Index of a sub-group inside a multiscale (pyramid) store.
///
/// Each group holds the same data at one zoom level. Values come from query
/// strings, so parsing is strict: anything that is not a non-negative base-10
/// integer is rejected instead of being silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupIndex(u32);

impl GroupIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for GroupIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl FromStr for GroupIndex {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DatasetError::invalid_parameter(
                "group",
                format!("expected a non-negative integer, got '{}'", s),
            ));
        }
        trimmed.parse().map(GroupIndex).map_err(|e| {
            DatasetError::invalid_parameter("group", format!("'{}' is out of range: {}", s, e))
        })
    }
}

impl fmt::Display for GroupIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options controlling how a dataset is opened.
///
/// Only `locator` and `group` take part in the cache key; two requests that
/// differ only in the boolean flags share a cached dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenOptions {
    pub group: Option<GroupIndex>,
    /// The locator names a reference manifest rather than the data itself.
    pub reference: bool,
    pub decode_times: bool,
    /// Read consolidated metadata for chunked stores.
    pub consolidated: bool,
    /// Use unsigned requests against object storage.
    pub anon: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            group: None,
            reference: false,
            decode_times: true,
            consolidated: true,
            anon: true,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: Option<GroupIndex>) -> Self {
        self.group = group;
        self
    }

    pub fn with_reference(mut self, reference: bool) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_decode_times(mut self, decode_times: bool) -> Self {
        self.decode_times = decode_times;
        self
    }

    pub fn with_consolidated(mut self, consolidated: bool) -> Self {
        self.consolidated = consolidated;
        self
    }

    pub fn with_anon(mut self, anon: bool) -> Self {
        self.anon = anon;
        self
    }
}
