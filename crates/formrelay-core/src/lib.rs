//! Core configuration and shared helpers for the formrelay submission relay

pub mod config;
pub mod error;
pub mod problem;
pub mod sanitize;
pub mod url_validation;
pub mod utils;

// Re-export commonly used types
pub use config::{FieldMappings, RelayConfig, RelaySettings, RetrySettings};
pub use error::{ConfigError, ConfigResult};
pub use problem::{Problem, ProblemDetails};
pub use sanitize::{sanitize_email, sanitize_text_field};
pub use url_validation::{validate_relay_url, BlockedAddress, UrlValidationError};
pub use utils::mask_sensitive;
