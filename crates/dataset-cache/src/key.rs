//! Cache key derivation.

use grid_common::GroupIndex;
use std::fmt;

/// Key under which an opened dataset is cached.
///
/// The key is the locator, suffixed with `_<group>` when a group is
/// requested. The open flags (reference, decode_times, consolidated, anon)
/// are not part of it: opening the same locator and group with different
/// flags returns whatever was cached first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(locator: &str, group: Option<GroupIndex>) -> Self {
        match group {
            Some(group) => Self(format!("{}_{}", locator, group)),
            None => Self(locator.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_group_is_locator() {
        let key = CacheKey::new("s3://bucket/sst.zarr", None);
        assert_eq!(key.as_str(), "s3://bucket/sst.zarr");
    }

    #[test]
    fn test_key_with_group() {
        let key = CacheKey::new("s3://bucket/pyramid.zarr", Some(GroupIndex::new(2)));
        assert_eq!(key.to_string(), "s3://bucket/pyramid.zarr_2");
    }

    #[test]
    fn test_key_is_deterministic_and_injective_on_group() {
        let locator = "https://example.com/data/cube.zarr";
        let keys: Vec<CacheKey> = (0..50)
            .map(|g| CacheKey::new(locator, Some(GroupIndex::new(g))))
            .collect();

        for (g, key) in keys.iter().enumerate() {
            assert_eq!(key, &CacheKey::new(locator, Some(GroupIndex::new(g as u32))));
        }

        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert!(!unique.contains(&CacheKey::new(locator, None)));
    }
}
