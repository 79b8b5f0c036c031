//! Error types for regraph.
//!
//! Library crates use [`RegraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The taxonomy mirrors how failures are handled: configuration errors are
//! fatal at startup, transient backend errors are retried then degraded,
//! integrity errors quarantine a single resource, and extraction problems
//! never surface here at all (they become extraction warnings).

use std::path::PathBuf;

/// Top-level error type for all regraph operations.
#[derive(Debug, thiserror::Error)]
pub enum RegraphError {
    /// Configuration loading or validation error. Fatal: aborts before any
    /// resource is processed.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external backend.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error (usually transient; retried).
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding backend error after retries were exhausted.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Data-integrity violation: a computed node id resolved to a node of a
    /// different kind, or a stored fingerprint is unexpectedly absent. The
    /// offending resource is quarantined; the run continues.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid input record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RegraphError>;

impl RegraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an integrity error from any displayable message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry might help (storage/network hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Storage(_))
    }
}
