//! Configuration for remote storage access and the byte-range cache.

use std::path::PathBuf;

/// Object storage connection settings.
///
/// Credentials are not configured here; signed requests pick them up from
/// the standard AWS environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Custom endpoint (e.g. "http://minio:9000"); `None` uses AWS.
    pub endpoint: Option<String>,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (required for local MinIO)
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            allow_http: false,
        }
    }
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            allow_http: std::env::var("S3_ALLOW_HTTP")
                .map(|v| parse_bool(&v))
                .unwrap_or(false),
        }
    }
}

/// Settings for the filesystem provider.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Wrap remote stores in the local byte-range cache.
    pub fs_cache_enabled: bool,

    pub fs_cache_directory: PathBuf,

    pub fs_cache_size_limit_mb: u64,

    /// Anonymous access for callers that do not say otherwise.
    pub anon_default: bool,

    pub s3: S3Config,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            fs_cache_enabled: false,
            fs_cache_directory: PathBuf::from("fsspec_cache"),
            fs_cache_size_limit_mb: 1024,
            anon_default: true,
            s3: S3Config::default(),
        }
    }
}

impl ReaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATASET_FS_CACHE_ENABLED") {
            config.fs_cache_enabled = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("DATASET_FS_CACHE_DIRECTORY") {
            config.fs_cache_directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DATASET_FS_CACHE_SIZE_LIMIT_MB") {
            if let Ok(size) = val.parse() {
                config.fs_cache_size_limit_mb = size;
            }
        }

        if let Ok(val) = std::env::var("DATASET_ANON_DEFAULT") {
            config.anon_default = parse_bool(&val);
        }

        config.s3 = S3Config::from_env();
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.fs_cache_enabled && self.fs_cache_size_limit_mb == 0 {
            return Err("fs_cache_size_limit_mb must be > 0".to_string());
        }
        if self.fs_cache_enabled && self.fs_cache_directory.as_os_str().is_empty() {
            return Err("fs_cache_directory must be set when the byte-range cache is enabled".to_string());
        }
        Ok(())
    }

    pub fn fs_cache_size_limit_bytes(&self) -> u64 {
        self.fs_cache_size_limit_mb * 1024 * 1024
    }
}

fn parse_bool(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
