//! # Bucket Error Types
//!
//! Storage failures carry the key they concern. `NotFound` is kept as a
//! distinct variant so callers can treat a missing object as a signal
//! ("stack never deployed") rather than a hard failure.

use thiserror::Error;

/// Errors from bucket operations.
#[derive(Error, Debug)]
pub enum BucketError {
    /// No object exists at the key.
    #[error("object not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key is empty, absolute, or escapes the bucket root.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The bucket does not support the operation (e.g. signed URLs on a
    /// local filesystem).
    #[error("operation not supported by {driver} bucket: {operation}")]
    Unsupported {
        /// Driver name.
        driver: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// The bucket URL could not be parsed.
    #[error("invalid bucket URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No driver is registered for the URL scheme.
    #[error("bucket URL {url} has an illegal prefix; expected one of: {supported}")]
    UnknownScheme {
        /// The rejected URL.
        url: String,
        /// Comma-separated supported schemes.
        supported: String,
    },

    /// Filesystem I/O failed.
    #[error("I/O error on {key}: {source}")]
    Io {
        /// The key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A driver-specific failure.
    #[error("{driver} bucket error: {message}")]
    Driver {
        /// Driver name.
        driver: &'static str,
        /// Failure description.
        message: String,
    },
}

impl BucketError {
    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Map an I/O error on `key`, folding `ErrorKind::NotFound` into
    /// [`BucketError::NotFound`].
    pub fn from_io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                key: key.to_string(),
            }
        } else {
            Self::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}
