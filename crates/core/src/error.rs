//! Error types for Cellar
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! `Error` is `Clone` because the write path hands the outcome of one physical
//! commit to every transaction that took part in it.

use std::io;
use thiserror::Error;

use crate::value::ValueType;

/// Result type alias for Cellar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Cellar database
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Value type does not match the declared index or filter type
    #[error("Wrong type: expected {expected}, got {actual}")]
    WrongType {
        /// Type the index or filter was declared with
        expected: ValueType,
        /// Type that was supplied
        actual: ValueType,
    },

    /// Lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blank record identifier supplied
    #[error("Record ID must not be empty")]
    EmptyId,

    /// Duplicate index or collection name
    #[error("Name already exists: {0}")]
    NameAlreadyExists(String),

    /// Two distinct names derived the same identifier
    #[error("Hash collision between '{0}' and '{1}'")]
    HashCollision(String, String),

    /// Deadline exceeded on the write or query path
    #[error("Operation timed out")]
    Timeout,

    /// Ciphertext shorter than seed + authentication tag
    #[error("Content too short: {len} bytes (minimum {min})")]
    ContentTooShort {
        /// Length of the supplied content
        len: usize,
        /// Minimum valid length
        min: usize,
    },

    /// Authenticated decryption failed (tampering or wrong key)
    #[error("Authentication failed: wrong key or corrupted data")]
    AuthenticationFailed,

    /// Operation attempted after shutdown
    #[error("Database is closed")]
    ClosedDatabase,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error (backup, load, config files)
    #[error("I/O error: {0}")]
    Io(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a `NotFound` error for anything displayable
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }

    /// Create an `InvalidInput` error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a `Storage` error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Whether the error came from decrypting a single payload
    pub fn is_decryption(&self) -> bool {
        matches!(
            self,
            Error::ContentTooShort { .. } | Error::AuthenticationFailed
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_wrong_type() {
        let err = Error::WrongType {
            expected: ValueType::Int,
            actual: ValueType::String,
        };
        let msg = err.to_string();
        assert!(msg.contains("Wrong type"));
        assert!(msg.contains("int"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_error_display_content_too_short() {
        let err = Error::ContentTooShort { len: 3, min: 32 };
        let msg = err.to_string();
        assert!(msg.contains("3"));
        assert!(msg.contains("32"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let result: Result<serde_json::Value> =
            serde_json::from_str("{not json").map_err(Into::into);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_decryption_classification() {
        assert!(Error::AuthenticationFailed.is_decryption());
        assert!(Error::ContentTooShort { len: 0, min: 32 }.is_decryption());
        assert!(!Error::Timeout.is_decryption());
    }

    #[test]
    fn test_error_is_clone() {
        let err = Error::storage("disk full");
        let copy = err.clone();
        assert_eq!(err, copy);
    }
}
