//! Error types for queue operations.

use crate::provider::ProviderType;
use thiserror::Error;

/// Boxed cause carried by storage failures.
pub type StorageSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Operation '{operation}' is not supported by the {provider} provider")]
    UnsupportedOperation {
        provider: ProviderType,
        operation: String,
    },

    #[error("Connection failed ({provider}): {message}")]
    ConnectionFailed {
        provider: ProviderType,
        message: String,
    },

    #[error("Storage operation '{operation}' failed ({provider}): {source}")]
    Storage {
        provider: ProviderType,
        operation: String,
        #[source]
        source: StorageSource,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Wrap a backend failure raised while performing `operation`.
    pub fn storage(
        provider: ProviderType,
        operation: impl Into<String>,
        source: impl Into<StorageSource>,
    ) -> Self {
        Self::Storage {
            provider,
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn unsupported(provider: ProviderType, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            provider,
            operation: operation.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Check if error is transient.
    ///
    /// Nothing in this crate retries; the classification is offered to callers
    /// that layer their own retry policy on top.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidArgument(_) => false,
            Self::QueueNotFound { .. } => false,
            Self::UnsupportedOperation { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::Storage { .. } => true,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error("Message carries no delivery info under metadatum '{key}'")]
    MissingDeliveryInfo { key: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
