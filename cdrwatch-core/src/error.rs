//! Error types for cdrwatch-core

use thiserror::Error;

/// Main error type for the cdrwatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network unreachable, timeout, or malformed response
    #[error("transport error: {0}")]
    Transport(String),

    /// The portal rejected the login
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Unexpected JSON/HTML shape from the portal
    #[error("parse error: {0}")]
    Parse(String),

    /// Notification sink failed to deliver
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Result type alias for cdrwatch-core
pub type Result<T> = std::result::Result<T, Error>;
