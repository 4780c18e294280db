//! Error types for the change algebra.

use thiserror::Error;

/// Result type for change application.
pub type ChangeResult<T> = Result<T, ChangeError>;

/// Errors raised while applying a change to an object tree.
///
/// The algebra fails fast and performs no recovery: a failed
/// application leaves recovery to the orchestrator.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// The change names a function that no registry knows.
    #[error("unknown change function: {name}")]
    UnknownFunction {
        /// The function name from the wire.
        name: String,
    },

    /// A path segment addressed a key that does not exist.
    #[error("missing key {key:?} at {path}")]
    MissingKey {
        /// The key that was not found.
        key: String,
        /// The path of the containing node.
        path: String,
    },

    /// A path segment or range argument was out of bounds.
    #[error("index {index} out of range at {path} (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the sequence that was indexed.
        len: usize,
        /// The path of the sequence.
        path: String,
    },

    /// A function was applied to a value of the wrong shape.
    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch {
        /// Shape the function required.
        expected: &'static str,
        /// The path of the subject.
        path: String,
    },

    /// A function received the wrong number or shape of arguments.
    #[error("bad arguments for {function}: {message}")]
    BadArguments {
        /// The function name.
        function: String,
        /// What was wrong.
        message: String,
    },
}

impl ChangeError {
    /// Creates an unknown-function error.
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }

    /// Creates a bad-arguments error.
    pub fn bad_arguments(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadArguments {
            function: function.into(),
            message: message.into(),
        }
    }
}
