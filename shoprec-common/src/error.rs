//! Common error types for shoprec

use thiserror::Error;

/// Common result type for shoprec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across shoprec crates
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed event, rejected before any state is touched
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Experiment configuration violates one or more invariants
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key-value store failure
    #[error("Store error: {0}")]
    Store(String),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Violations carried by a validation error (empty for other kinds)
    pub fn violations(&self) -> &[String] {
        match self {
            Error::Validation(violations) => violations,
            _ => &[],
        }
    }
}
