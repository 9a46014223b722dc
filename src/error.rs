// src/error.rs

use thiserror::Error;

/// Core error types for hubsync
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database or client initialization error
    #[error("Failed to initialize: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Network or HTTP-level failure talking to the hub
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Malformed data received from the hub or read from disk
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Local file handling failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Package archive could not be read or unpacked
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// The acting principal lacks a capability an operation requires
    #[error("Principal '{principal}' lacks capability '{capability}'")]
    PermissionDenied {
        principal: String,
        capability: String,
    },

    /// Store refused to persist a package
    #[error("Commit error: {0}")]
    CommitError(String),

    /// Invalid setting value
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),
}

/// Result type alias using hubsync's Error type
pub type Result<T> = std::result::Result<T, Error>;
