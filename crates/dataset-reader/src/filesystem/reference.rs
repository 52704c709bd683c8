//! Reference manifests: a JSON index mapping store keys to inline data or
//! byte ranges in other files, read as one virtual chunked store.
//!
//! Both layouts are accepted: version 0 (the document is the key map) and
//! version 1 (`{"version": 1, "templates": {..}, "refs": {..}}`). Generated
//! key ranges (`gen`) are not supported and are skipped.

use base64::Engine as _;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use grid_common::{DatasetError, DatasetResult};

const BASE64_PREFIX: &str = "base64:";

/// Where the bytes of one store key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefEntry {
    Inline(Bytes),
    /// A whole target file.
    Object { url: String },
    Range { url: String, offset: usize, length: usize },
}

impl RefEntry {
    pub fn url(&self) -> Option<&str> {
        match self {
            RefEntry::Inline(_) => None,
            RefEntry::Object { url } | RefEntry::Range { url, .. } => Some(url),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceManifest {
    refs: BTreeMap<String, RefEntry>,
}

impl ReferenceManifest {
    pub fn parse(raw: &[u8]) -> DatasetResult<Self> {
        let doc: Value = serde_json::from_slice(raw)?;
        let Value::Object(doc) = doc else {
            return Err(DatasetError::Codec("reference manifest must be a JSON object".to_string()));
        };

        let versioned = doc.get("version").and_then(Value::as_u64).is_some();
        let (refs, templates) = if versioned {
            let refs = doc
                .get("refs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let templates = doc
                .get("templates")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if doc.contains_key("gen") {
                warn!("Reference manifest uses generated keys; they are ignored");
            }
            (refs, templates)
        } else {
            (doc, Map::new())
        };

        let templates: Vec<(String, String)> = templates
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (format!("{{{{{}}}}}", k), s.to_string())))
            .collect();

        let mut parsed = BTreeMap::new();
        for (key, value) in refs {
            let entry = parse_entry(&key, value, &templates)?;
            parsed.insert(key, entry);
        }
        Ok(Self { refs: parsed })
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&RefEntry> {
        self.refs.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &RefEntry)> {
        self.refs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Distinct target URLs, sorted.
    pub fn targets(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.refs.values().filter_map(RefEntry::url).collect();
        urls.sort_unstable();
        urls.dedup();
        urls
    }

    /// Rewrite relative target URLs against the manifest's own location.
    pub fn resolve_relative(&mut self, manifest_locator: &str) {
        let base = match manifest_locator.rfind('/') {
            Some(i) => &manifest_locator[..i],
            None => "",
        };
        for entry in self.refs.values_mut() {
            if let RefEntry::Object { url } | RefEntry::Range { url, .. } = entry {
                if !url.contains("://") && !url.starts_with('/') && !base.is_empty() {
                    *url = format!("{}/{}", base, url);
                }
            }
        }
    }
}

fn parse_entry(key: &str, value: Value, templates: &[(String, String)]) -> DatasetResult<RefEntry> {
    let expand = |url: &str| {
        templates
            .iter()
            .fold(url.to_string(), |acc, (pattern, replacement)| acc.replace(pattern, replacement))
    };
    let bad = |msg: &str| DatasetError::Codec(format!("reference '{}': {}", key, msg));

    match value {
        Value::String(s) => match s.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(|data| RefEntry::Inline(Bytes::from(data)))
                .map_err(|e| bad(&format!("invalid base64: {}", e))),
            None => Ok(RefEntry::Inline(Bytes::from(s))),
        },
        Value::Array(parts) => match parts.as_slice() {
            [Value::String(url)] => Ok(RefEntry::Object { url: expand(url) }),
            [Value::String(url), offset, length] => {
                let offset = offset.as_u64().ok_or_else(|| bad("offset is not an integer"))?;
                let length = length.as_u64().ok_or_else(|| bad("length is not an integer"))?;
                Ok(RefEntry::Range {
                    url: expand(url),
                    offset: offset as usize,
                    length: length as usize,
                })
            }
            _ => Err(bad("expected [url] or [url, offset, length]")),
        },
        // Some writers embed metadata documents as JSON rather than strings.
        Value::Object(_) => Ok(RefEntry::Inline(Bytes::from(value.to_string()))),
        _ => Err(bad("unsupported reference value")),
    }
}

/// Read `length` bytes at `offset` from a local file.
pub(crate) async fn read_local_range(path: &Path, offset: usize, length: usize) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset as u64)).await?;
    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
