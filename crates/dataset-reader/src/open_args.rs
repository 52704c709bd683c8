//! Engine-specific open arguments.

use grid_common::{GroupIndex, OpenOptions};

use crate::engine::Engine;

/// Arguments handed to a loader, derived from the caller's options.
///
/// `None` means the argument is not passed at all, which is how the legacy
/// engine ignores the consolidated-metadata flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenArgs {
    pub engine: Engine,
    pub decode_times: bool,
    pub consolidated: Option<bool>,
    /// Consolidation flag for the storage backend underneath the store.
    pub backend_consolidated: Option<bool>,
    /// File locking; disabled for legacy files so handles can be shared.
    pub lock: Option<bool>,
    /// Sub-group of a multiscale store.
    pub group: Option<GroupIndex>,
}

impl OpenArgs {
    pub fn build(opts: &OpenOptions, engine: Engine) -> Self {
        match engine {
            Engine::LegacyGrid => Self {
                engine,
                decode_times: opts.decode_times,
                consolidated: None,
                backend_consolidated: None,
                lock: Some(false),
                group: opts.group,
            },
            Engine::ChunkedStore => Self {
                engine,
                decode_times: opts.decode_times,
                // Reference manifests never carry consolidated metadata.
                consolidated: Some(opts.consolidated && !opts.reference),
                backend_consolidated: opts.reference.then_some(false),
                lock: None,
                group: opts.group,
            },
        }
    }

    /// Whether the loader should look for consolidated metadata.
    pub fn use_consolidated(&self) -> bool {
        self.consolidated.unwrap_or(false) && self.backend_consolidated != Some(false)
    }
}
