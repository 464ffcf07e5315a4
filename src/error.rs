//! Error types for credential-verifier.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the verification core and its bootstrap.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was malformed (missing or empty credential id).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The local verification store could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persisted data could not be decoded.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// The issuance authority's store could not be consulted.
    #[error("authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error outside the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::AuthorityUnavailable(_)
        )
    }
}
