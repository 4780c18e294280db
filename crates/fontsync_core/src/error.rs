//! Error types for the editor core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the per-document orchestrator.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("backend error: {0}")]
    Backend(#[from] fontsync_backend::BackendError),

    /// Change application error.
    #[error("change error: {0}")]
    Change(#[from] fontsync_change::ChangeError),

    /// A change addressed a root location edits cannot target.
    #[error("invalid edit root: {path}")]
    InvalidEditRoot {
        /// The offending root path.
        path: String,
    },

    /// Touched data did not have the shape the write path requires.
    #[error("invalid data for {field}: {message}")]
    InvalidData {
        /// The font field involved.
        field: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A coalesced fetch failed or was abandoned.
    #[error("fetch failed: {message}")]
    FetchFailed {
        /// Description of the failure.
        message: String,
    },

    /// The write subsystem died; the document no longer accepts edits.
    #[error("editing disabled: {reason}")]
    EditingDisabled {
        /// Why the write subsystem shut down.
        reason: String,
    },

    /// The handler has been closed.
    #[error("document is closed")]
    Closed,
}

impl CoreError {
    /// Creates an invalid-data error.
    pub fn invalid_data(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a fetch-failed error.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::FetchFailed {
            message: message.into(),
        }
    }
}
