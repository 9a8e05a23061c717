//! Error types shared by the HomeMatch modules.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for HomeMatch operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HomeMatchError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Vector database error.
    #[error("Qdrant error: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),

    /// Background task failed to complete.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration file is missing.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// Key is absent from the configuration file.
    #[error("Key '{key}' not found in the configuration file {}", .path.display())]
    MissingConfigKey {
        /// Requested key.
        key: String,
        /// File that was searched.
        path: PathBuf,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote API answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    Api {
        /// Which endpoint failed.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },

    /// Remote API answered with something we could not use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Embedding model failure.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Operation was called without anything to work on.
    #[error("Empty input: {0}")]
    EmptyInput(String),
}

/// Result type alias for HomeMatch operations.
pub type Result<T> = std::result::Result<T, HomeMatchError>;
