//! Adapter error types
//!
//! Failures an identity adapter can raise, with transient/permanent classification.

use thiserror::Error;

/// Error that can occur during adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Failed to establish connection to the identity system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Identity system is temporarily unavailable.
    #[error("system unavailable: {message}")]
    Unavailable { message: String },

    /// Operation was rejected or failed inside the identity system.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record does not exist in the identity system.
    #[error("user not found: {identifier}")]
    UserNotFound { identifier: String },

    /// Record data could not be interpreted.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// No adapter is registered for the named system.
    #[error("no adapter registered for system '{system}'")]
    UnknownSystem { system: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AdapterError {
    /// Create a connection failure without an underlying source.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failure without an underlying source.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an unknown system error.
    pub fn unknown_system(system: impl Into<String>) -> Self {
        Self::UnknownSystem {
            system: system.into(),
        }
    }

    /// Check if this error is transient and the call may succeed on a later invocation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::ConnectionFailed { .. } | AdapterError::Unavailable { .. }
        )
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
