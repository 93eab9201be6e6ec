//! Error types for the dataset directory
//!
//! This module defines the common error types used throughout the system.
//! Not-found is kept apart from transport and decode failures so callers
//! can tell "nobody has this dataset" from "we could not ask".

use thiserror::Error;

/// Common result type for directory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the dataset directory
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    // Network/RPC errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("remote rejected request: {0}")]
    RemoteRejected(String),

    #[error("request timeout")]
    Timeout,

    // Encoding errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    // Data access errors
    #[error("invalid data url: {0}")]
    InvalidDataUrl(String),

    #[error("no driver registered for type: {0}")]
    DriverNotFound(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a driver error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Create a not implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented(feature.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DatasetNotFound(_) | Self::KeyNotFound(_))
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::Rpc(_)
        )
    }

    /// Check if bytes were retrieved but could not be parsed
    #[must_use]
    pub const fn is_decode_failure(&self) -> bool {
        matches!(self, Self::Deserialization(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Self::Deserialization(e.to_string())
        } else {
            Self::Serialization(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::DatasetNotFound("abc".into()).is_not_found());
        assert!(Error::KeyNotFound("abc".into()).is_not_found());
        assert!(!Error::ConnectionFailed("refused".into()).is_not_found());
        assert!(!Error::Deserialization("bad".into()).is_not_found());
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::ConnectionFailed("refused".into()).is_retryable());
        assert!(!Error::DatasetNotFound("abc".into()).is_retryable());
    }

    #[test]
    fn test_json_error_maps_to_decode_failure() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(err.is_decode_failure());
    }
}
