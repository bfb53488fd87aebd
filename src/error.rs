//! Error types for the fleet console

use thiserror::Error;

/// Result type alias for fleet console operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fleet console
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Rejected input (malformed CIDR, bad port, missing field)
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Request conflicts with the current state of a resource
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote supervisor daemon reported an error or was unreachable
    #[error("node error: {0}")]
    Node(String),

    /// Operation did not finish before its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Short machine-readable code used in API error bodies
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Node(_) => "node_error",
            Self::Timeout(_) => "timeout",
            Self::Database(_) | Self::Sqlite(_) => "db_error",
            Self::Io(_) => "io_error",
            Self::Http(_) => "http_error",
            Self::Serialization(_) | Self::Toml(_) => "serialization_error",
        }
    }
}
