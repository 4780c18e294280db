//! Error types for font storage backends.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a font storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Write attempted on a backend without write support.
    #[error("backend is read-only")]
    ReadOnly,

    /// The backend does not implement an optional capability.
    #[error("operation not supported by this backend: {operation}")]
    NotSupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// A read from the underlying storage failed.
    #[error("backend read failed: {message}")]
    ReadFailed {
        /// Description of the failure.
        message: String,
    },

    /// A write to the underlying storage failed.
    #[error("backend write failed: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },
}

impl BackendError {
    /// Creates a not-supported error for `operation`.
    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    /// Creates a read-failure error.
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed {
            message: message.into(),
        }
    }

    /// Creates a write-failure error.
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}
