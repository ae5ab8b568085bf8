//! Error types for the agency workflow engine

use thiserror::Error;

/// Main error type for all workflow operations
#[derive(Error, Debug)]
pub enum AgencyError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid label: {0}")]
    Label(#[from] agency_types::LabelError),
}

/// Stable discriminator callers map to user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    Validation,
    PreconditionFailed,
    Persistence,
    NotFound,
    Config,
    Io,
    Json,
    Http,
}

impl AgencyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Validation(_) | Self::Label(_) => ErrorKind::Validation,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Http(_) => ErrorKind::Http,
        }
    }

    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Persistence | ErrorKind::Io | ErrorKind::Http)
    }
}

impl From<config::ConfigError> for AgencyError {
    fn from(e: config::ConfigError) -> Self {
        AgencyError::Config(e.to_string())
    }
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, AgencyError>;
