//! Error types for the tablesync command-line tool.

use std::path::PathBuf;

use tablesync_core::error::SyncError;

/// Errors raised outside the synchronization core.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Database error while connecting or querying.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error while reading a definition file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A definition file is not valid JSON for the expected document.
    #[error("Failed to parse definition '{path}': {source}")]
    Definition {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Planning or synchronization failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Serialization of a report failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for the command-line tool.
pub type Result<T> = std::result::Result<T, CliError>;
