//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbfacade.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `Validation`: Configuration document does not match any database model
//! - `ConfigError`: Configuration lookup, file or resolution errors
//! - `UnsupportedDialect`: Dialect has no template or no available driver
//! - `PagingError`: Paging requested without a usable page size
//! - `ConnectionFailed`: Database connection errors
//! - `QueryFailed`: Query execution errors
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `EngineError`: Engine-specific database errors

use thiserror::Error;

use crate::config::ModelValidationErrors;

/// Main error type for dbfacade operations
#[derive(Error, Debug)]
pub enum FacadeError {
    /// The configuration does not match the single or multi-database model
    #[error("The config does not match the model.\n{0}")]
    Validation(#[from] ModelValidationErrors),

    /// Configuration error (file not found, unknown database name, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Dialect is not supported for the requested operation
    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// Paging was requested but no page size is available
    #[error("Paging error: {0}")]
    PagingError(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },
}

impl FacadeError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::UnsupportedDialect(_) => "UNSUPPORTED_DIALECT",
            Self::PagingError(_) => "PAGING_ERROR",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
        }
    }

    /// Get human-readable error message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an unsupported dialect error
    pub fn unsupported_dialect(message: impl Into<String>) -> Self {
        Self::UnsupportedDialect(message.into())
    }

    /// Create a paging error
    pub fn paging_error(message: impl Into<String>) -> Self {
        Self::PagingError(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }
}

/// Result type alias for dbfacade operations
pub type Result<T> = std::result::Result<T, FacadeError>;
