//! Error types for revgate-core.

use thiserror::Error;

/// Suggestion store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No suggestion carries the requested id.
    #[error("suggestion not found: {0}")]
    NotFound(String),

    /// SQLite or connection-thread failure.
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

/// Errors from the external language-model endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A request rejected before any file was looked at.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid analysis request: {0}")]
    InvalidRequest(String),
}

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Failure to pull file diffs out of the host's version control.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("diff extraction failed: {0}")]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A status string outside ACCEPTED / REJECTED / DISMISSED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status '{0}' (expected one of ACCEPTED, REJECTED, DISMISSED)")]
pub struct StatusParseError(pub String);
