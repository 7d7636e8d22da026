//! Error types for the biotrade system.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the biotrade system.
#[derive(Error, Debug)]
pub enum Error {
    /// A required column is absent from a dataset.
    #[error("Missing column '{column}' (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    /// Schema error (row width, duplicate column names).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Consistency check failure promoted to an error.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a missing column error.
    pub fn missing_column(column: impl Into<String>, available: &[String]) -> Self {
        Error::MissingColumn {
            column: column.into(),
            available: available.to_vec(),
        }
    }

    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a consistency error.
    pub fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(msg.into())
    }
}
