//! Error types shared by the configuration layer

use std::path::PathBuf;
use thiserror::Error;

use crate::url_validation::UrlValidationError;

/// Errors raised while loading or sanitizing relay settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Target form id must be a positive integer, got {0}")]
    InvalidFormId(i64),

    #[error("Relay URL is not configured")]
    MissingRelayUrl,

    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(#[from] UrlValidationError),

    #[error("Relative file path must stay inside the document root: {0}")]
    InvalidRelativePath(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },

    #[error("Invalid retry settings: {0}")]
    InvalidRetry(String),

    #[error("Relay timeout must be at least one second")]
    ZeroTimeout,
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
