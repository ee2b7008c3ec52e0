// src/error.rs

//! Unified error handling for the crawler engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue broker error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Document store error
    #[error("Store error: {0}")]
    Store(String),

    /// Another worker holds the lease for this URL. The `Exceeded` prefix
    /// is the wire contract shared with external lock providers.
    #[error("Exceeded lock allowance for {url}")]
    LockContended { url: String },

    /// Lock service error other than contention
    #[error("Lock error: {0}")]
    Lock(String),

    /// Remote API returned a non-success status
    #[error("Status {status} fetching {url}")]
    FetchStatus { status: u16, url: String },

    /// Request is missing required identity fields
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Create a malformed-request error.
    pub fn malformed(message: impl fmt::Display) -> Self {
        Self::Malformed(message.to_string())
    }

    /// Lock contention for the given URL.
    pub fn contended(url: impl Into<String>) -> Self {
        Self::LockContended { url: url.into() }
    }
}
