//! Storage Error Types
//!
//! Structured error handling for all storage operations.
//! Maps failures to HTTP status codes for the serving layer and
//! classifies which remote failures are worth retrying.

/// Storage engine error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The (id, name) pair does not address a live record. Carries no
    /// detail: a missing folder, a missing sidecar, and a name mismatch
    /// must be indistinguishable to callers.
    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend unavailable: {message}")]
    Unavailable { status: Option<u16>, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StorageError {
    /// Map a storage error to the HTTP status the serving layer should
    /// answer with
    pub fn http_status(&self) -> u16 {
        match self {
            StorageError::NotFound => 404,
            StorageError::Conflict(_) => 409,
            StorageError::InvalidRequest(_) => 400,
            StorageError::Unavailable { .. } => 503,
            StorageError::Io(_) => 500,
            StorageError::Metadata(_) => 500,
        }
    }

    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Unavailable { status, .. } => match status {
                Some(401) | Some(408) | Some(429) => true,
                Some(code) => (500..=599).contains(code),
                // No status means the request never completed (network)
                None => true,
            },
            _ => false,
        }
    }

    /// Create a storage error from a remote HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            404 => StorageError::NotFound,
            400 => StorageError::InvalidRequest(body.to_string()),
            _ => StorageError::Unavailable {
                status: Some(status),
                message: body.to_string(),
            },
        }
    }

    /// Create a storage error for a request that never reached the remote
    pub fn network(err: reqwest::Error) -> Self {
        StorageError::Unavailable {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, StorageError>;
