//! Error handling for the strata-common crate.

use thiserror::Error;

/// Infrastructure error type that abstracts over the underlying storage libraries.
///
/// Every variant carries a human readable message and an optional source error,
/// so callers can match on the category while still reaching the root cause.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO operation failed: {message}")]
    IoError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Resource not found: {message}")]
    NotFoundError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Permission denied: {message}")]
    PermissionError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid configuration: {message}")]
    ConfigurationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

impl CommonError {
    /// Create an IO error with a custom message.
    pub fn io_error<S: Into<String>>(message: S) -> Self {
        Self::IoError {
            message: message.into(),
            source: None,
        }
    }

    /// Create an IO error with a custom message and source error.
    pub fn io_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::IoError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a not found error with a custom message.
    pub fn not_found_error<S: Into<String>>(message: S) -> Self {
        Self::NotFoundError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a not found error with a custom message and source error.
    pub fn not_found_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::NotFoundError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a permission error with a custom message and source error.
    pub fn permission_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::PermissionError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with a custom message and source error.
    pub fn configuration_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an internal error with a custom message.
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with a custom message and source error.
    pub fn internal_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::InternalError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns true if the error reports a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommonError::NotFoundError { .. })
    }

    /// The message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            CommonError::IoError { message, .. }
            | CommonError::NotFoundError { message, .. }
            | CommonError::PermissionError { message, .. }
            | CommonError::ConfigurationError { message, .. }
            | CommonError::InternalError { message, .. } => message,
        }
    }
}

/// Context helpers for adding rich context to errors.
pub mod context {
    use super::*;

    /// Extension trait for adding context to Results.
    pub trait ErrorContext<T> {
        /// Wrap the error as an IO error with the given context.
        fn with_io_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;

        /// Wrap the error as a configuration error with the given context.
        fn with_config_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;
    }

    impl<T, E> ErrorContext<T> for std::result::Result<T, E>
    where
        E: Into<anyhow::Error>,
    {
        fn with_io_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| CommonError::io_error_with_source(f(), e.into()))
        }

        fn with_config_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| CommonError::configuration_error_with_source(f(), e.into()))
        }
    }
}

pub use context::ErrorContext;
