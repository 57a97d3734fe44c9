//! Error types for utility functions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for utility operations.
pub type Result<T> = std::result::Result<T, UtilsError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum UtilsError {
    /// A required environment variable is unset.
    #[error("Environment variable '{key}' is not set")]
    MissingEnv { key: String },

    /// An environment variable is set but cannot be parsed.
    #[error("Environment variable '{key}' has an invalid value: {reason}")]
    InvalidEnv { key: String, reason: String },

    /// A config file could not be read.
    #[error("Cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file could not be parsed.
    #[error("Failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Configuration is structurally wrong (unknown format, bad value).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A loaded configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}
