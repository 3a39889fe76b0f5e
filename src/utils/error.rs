//! Error types for synchronous request misuse and engine bootstrap

use thiserror::Error;

/// Errors raised synchronously when a caller violates the request contract.
///
/// These are never delivered through the asynchronous callback path; network
/// failures use [`crate::network::UrlRequestException`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// A required argument was missing or empty
    #[error("{0}")]
    NullArgument(String),
    /// The request is not in a state that allows the operation
    #[error("{0}")]
    IllegalState(String),
    /// An argument was rejected by the request or by the engine
    #[error("{0}")]
    IllegalArgument(String),
    /// Unexpected engine fault
    #[error("{0}")]
    Runtime(String),
    /// Engine bootstrap failed
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

impl RequestError {
    pub(crate) fn null_argument(msg: impl Into<String>) -> Self {
        Self::NullArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub(crate) fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }
}

/// Engine bootstrap errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// The engine reports a different build than the one compiled in
    #[error("Expected engine version {expected}, actual version {actual}.")]
    VersionMismatch { expected: String, actual: String },
    /// The init thread could not be spawned or has gone away
    #[error("init thread unavailable: {0}")]
    InitThread(String),
}

/// Convenience Result type for request operations
pub type Result<T> = std::result::Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_verbatim() {
        let err = RequestError::illegal_state("Unexpected read attempt.");
        assert_eq!(err.to_string(), "Unexpected read attempt.");
    }

    #[test]
    fn test_bootstrap_error_converts() {
        let err: RequestError = BootstrapError::VersionMismatch {
            expected: "1".into(),
            actual: "2".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Expected engine version 1, actual version 2."
        );
    }
}
