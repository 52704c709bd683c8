//! Error types for dataset access.

use thiserror::Error;

/// Result type alias using DatasetError.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Primary error type for opening and normalizing datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    // === Request Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Cannot determine spatial dimensions of '{variable}' (dims: {dims:?})")]
    AmbiguousDimensions { variable: String, dims: Vec<String> },

    #[error("Group {group} not found in {locator}")]
    GroupNotFound { locator: String, group: String },

    // === Data Errors ===
    #[error("Failed to open {locator}: {message}")]
    OpenFailure { locator: String, message: String },

    #[error("Invalid dataset encoding: {0}")]
    Codec(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DatasetError {
    pub fn open_failed(locator: impl Into<String>, message: impl ToString) -> Self {
        DatasetError::OpenFailure {
            locator: locator.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        DatasetError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DatasetError::InvalidParameter { .. } => "InvalidParameter",
            DatasetError::InvalidSelection(_) => "InvalidSelection",
            DatasetError::VariableNotFound(_) => "VariableNotFound",
            DatasetError::AmbiguousDimensions { .. } => "AmbiguousDimensions",
            DatasetError::GroupNotFound { .. } => "GroupNotFound",
            DatasetError::OpenFailure { .. } => "OpenFailure",
            DatasetError::Codec(_) => "Codec",
            DatasetError::Configuration(_) => "Configuration",
            DatasetError::CacheUnavailable(_) => "CacheUnavailable",
            DatasetError::Internal(_) => "Internal",
        }
    }

    /// Get the HTTP status code an outer transport layer should use.
    pub fn http_status_code(&self) -> u16 {
        match self {
            DatasetError::InvalidParameter { .. } | DatasetError::InvalidSelection(_) => 400,

            DatasetError::VariableNotFound(_) | DatasetError::GroupNotFound { .. } => 404,

            DatasetError::AmbiguousDimensions { .. } => 422,

            DatasetError::OpenFailure { .. } => 502,
            DatasetError::CacheUnavailable(_) => 503,

            _ => 500,
        }
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        DatasetError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        DatasetError::Codec(format!("JSON error: {}", err))
    }
}

impl From<postcard::Error> for DatasetError {
    fn from(err: postcard::Error) -> Self {
        DatasetError::Codec(format!("postcard error: {}", err))
    }
}
