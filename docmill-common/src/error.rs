//! Common error types for DocMill

use thiserror::Error;

/// Common result type for DocMill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the DocMill worker and library code
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Balance too low to cover a deduction
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// No evidence sources could be gathered for a job
    #[error("No sources available: {0}")]
    NoSources(String),

    /// No generation provider available for a paid-tier job
    #[error("No generation provider available: {0}")]
    NoProvider(String),

    /// Transient upstream provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error stems from missing configuration rather than a
    /// transient upstream condition. Configuration errors fail immediately
    /// and are never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::NoProvider(_))
    }
}
