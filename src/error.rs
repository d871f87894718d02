//! WolfPool Error Types

use thiserror::Error;

/// Result type alias for WolfPool operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfPool error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Addressing errors
    #[error("Invalid pool address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    // Size config errors
    #[error("Malformed size config: {0}")]
    SizeConfig(#[from] serde_json::Error),

    // Coordination service errors
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Lifecycle errors
    #[error("Cluster handle is closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Io(_))
    }
}
