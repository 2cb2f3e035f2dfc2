//! Huginn error types

use std::time::Duration;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Key errors
    #[error("invalid key: key must not be empty")]
    InvalidKey,

    #[error("invalid prefix '{prefix}': expected {expected} bytes")]
    InvalidPrefix { prefix: String, expected: usize },

    /// Key is shorter than the registry's prefix, or the prefix does not
    /// end on a character boundary.
    #[error("type:[invalid_key] key:[{key}] (shorter than {prefix_len}-byte prefix)")]
    MalformedKey { key: String, prefix_len: usize },

    #[error("type:[invalid_key] key:[{key}] (no loader registered for prefix)")]
    UnknownPrefix { key: String },

    // Fetch errors
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("fetch for '{key}' timed out after {timeout:?}")]
    FetchTimeout { key: String, timeout: Duration },

    #[error("loader for '{key}' panicked")]
    LoaderPanicked { key: String },

    #[error("refresh for '{key}' was cancelled before completing")]
    RefreshCancelled { key: String },

    /// Reported by the status sweep when an in-progress refresh outlives
    /// its deadline. Never returned from a call.
    #[error("blocked time exceeded: refresh for '{key}' still in progress")]
    RefreshStalled { key: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HuginnError {
    /// Wrap a data-source failure for return from a loader.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        HuginnError::Upstream(err.to_string())
    }

    /// Whether the error is about the key itself rather than the data source.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            HuginnError::InvalidKey
                | HuginnError::MalformedKey { .. }
                | HuginnError::UnknownPrefix { .. }
        )
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
