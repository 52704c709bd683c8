//! Error types for cache backends.

use grid_common::DatasetError;
use std::io;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while talking to a cache backend.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Socket or filesystem failure.
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The server answered with something the client does not understand.
    #[error("cache protocol error: {0}")]
    Protocol(String),

    /// The on-disk index could not be read or written.
    #[error("cache index error: {0}")]
    Index(String),

    /// Backend selection or parameters are invalid.
    #[error("cache configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether the error is a dropped or reset connection.
    ///
    /// These are the only failures the memcached client retries.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            CacheError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Index(err.to_string())
    }
}

impl From<CacheError> for DatasetError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Config(msg) => DatasetError::Configuration(msg),
            other => DatasetError::CacheUnavailable(other.to_string()),
        }
    }
}
