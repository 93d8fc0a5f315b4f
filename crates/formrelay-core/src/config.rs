//! Relay settings and the sanitized configuration derived from them.
//!
//! `RelaySettings` is what the settings storage hands over (a YAML file plus
//! environment overrides); every field has a default so partially filled
//! settings still load. `RelaySettings::sanitize` turns it into the immutable
//! `RelayConfig` consumed by the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::sanitize::sanitize_text_field;
use crate::url_validation::validate_relay_url;

pub const DEFAULT_RELATIVE_FILE_PATH: &str = "wp-content/documents-private/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_FORM_ID: &str = "FORMRELAY_FORM_ID";
pub const ENV_RELAY_URL: &str = "FORMRELAY_RELAY_URL";
pub const ENV_API_TOKEN: &str = "FORMRELAY_API_TOKEN";
pub const ENV_DOCUMENT_ROOT: &str = "FORMRELAY_DOCUMENT_ROOT";
pub const ENV_RELATIVE_FILE_PATH: &str = "FORMRELAY_RELATIVE_FILE_PATH";

/// Payload keys for each symbolic field; an empty key means "not mapped"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMappings {
    pub name: String,
    pub date_of_birth: String,
    pub email: String,
    pub files: String,
}

impl FieldMappings {
    fn sanitized(&self) -> Self {
        Self {
            name: sanitize_text_field(&self.name),
            date_of_birth: sanitize_text_field(&self.date_of_birth),
            email: sanitize_text_field(&self.email),
            files: sanitize_text_field(&self.files),
        }
    }
}

/// Retry behaviour for transport failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first one; 1 disables retries
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidRetry(
                "max_backoff_ms must not be below initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Raw relay settings as stored by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Only entries created by this form are relayed
    pub form_id: i64,
    pub relay_url: String,
    pub api_token: String,
    pub field_mappings: FieldMappings,
    /// Sub-key holding the file id inside each files entry
    pub doc_id_key: String,
    /// Sub-key holding the document type inside each files entry
    pub doc_type_key: String,
    /// Directory, relative to `document_root`, where attachments live
    pub relative_file_path: String,
    pub document_root: PathBuf,
    /// Send the configured `doc_id_key` / `doc_type_key` names as parts
    pub send_key_names: bool,
    pub timeout_secs: u64,
    pub retry: RetrySettings,
    /// chmod resolved attachments to 0644 before reading them
    pub normalize_permissions: bool,
    pub block_private_targets: bool,
    /// JSON-lines file recording relays that failed
    pub failed_relay_log: Option<PathBuf>,
    /// JSON map of file id to stored path
    pub attachment_manifest: Option<PathBuf>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            form_id: 0,
            relay_url: String::new(),
            api_token: String::new(),
            field_mappings: FieldMappings::default(),
            doc_id_key: String::new(),
            doc_type_key: String::new(),
            relative_file_path: DEFAULT_RELATIVE_FILE_PATH.to_string(),
            document_root: PathBuf::from("."),
            send_key_names: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetrySettings::default(),
            normalize_permissions: false,
            block_private_targets: false,
            failed_relay_log: None,
            attachment_manifest: None,
        }
    }
}

impl RelaySettings {
    /// Parse settings from a YAML document
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read settings from a YAML file.
    ///
    /// Relative `document_root`, `failed_relay_log` and `attachment_manifest`
    /// paths are resolved against the directory holding the file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_yaml(&yaml)?;

        if let Some(base) = path.parent() {
            settings.document_root = rebase(base, &settings.document_root);
            settings.failed_relay_log = settings.failed_relay_log.map(|p| rebase(base, &p));
            settings.attachment_manifest = settings.attachment_manifest.map(|p| rebase(base, &p));
        }

        debug!("Loaded relay settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `FORMRELAY_*` overrides fetched through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FORM_ID) {
            self.form_id = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    key: ENV_FORM_ID.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_RELAY_URL) {
            self.relay_url = value;
        }
        if let Some(value) = lookup(ENV_API_TOKEN) {
            self.api_token = value;
        }
        if let Some(value) = lookup(ENV_DOCUMENT_ROOT) {
            self.document_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_RELATIVE_FILE_PATH) {
            self.relative_file_path = value;
        }
        Ok(())
    }

    /// Validate and normalize into the immutable run configuration
    pub fn sanitize(&self) -> ConfigResult<RelayConfig> {
        if self.form_id <= 0 {
            return Err(ConfigError::InvalidFormId(self.form_id));
        }

        if self.relay_url.trim().is_empty() {
            return Err(ConfigError::MissingRelayUrl);
        }
        let relay_url = validate_relay_url(&self.relay_url, self.block_private_targets)?;

        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.retry.validate()?;

        Ok(RelayConfig {
            form_id: self.form_id,
            relay_url,
            api_token: sanitize_text_field(&self.api_token),
            field_mappings: self.field_mappings.sanitized(),
            doc_id_key: sanitize_text_field(&self.doc_id_key),
            doc_type_key: sanitize_text_field(&self.doc_type_key),
            relative_file_path: normalize_relative_dir(&self.relative_file_path)?,
            document_root: self.document_root.clone(),
            send_key_names: self.send_key_names,
            timeout: Duration::from_secs(self.timeout_secs),
            retry: self.retry.clone(),
            normalize_permissions: self.normalize_permissions,
            failed_relay_log: self.failed_relay_log.clone(),
            attachment_manifest: self.attachment_manifest.clone(),
        })
    }
}

/// Sanitized, immutable configuration for one pipeline instance
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub form_id: i64,
    pub relay_url: Url,
    pub api_token: String,
    pub field_mappings: FieldMappings,
    pub doc_id_key: String,
    pub doc_type_key: String,
    /// Normalized: no leading `/`, trailing `/` unless empty
    pub relative_file_path: String,
    pub document_root: PathBuf,
    pub send_key_names: bool,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub normalize_permissions: bool,
    pub failed_relay_log: Option<PathBuf>,
    pub attachment_manifest: Option<PathBuf>,
}

impl RelayConfig {
    /// Directory every resolved attachment is re-rooted under
    pub fn attachment_dir(&self) -> PathBuf {
        self.document_root.join(&self.relative_file_path)
    }
}

/// Normalize the attachment directory relative to the document root.
///
/// ```
/// use formrelay_core::config::normalize_relative_dir;
///
/// assert_eq!(normalize_relative_dir("/wp-content//private").unwrap(), "wp-content/private/");
/// assert_eq!(normalize_relative_dir("").unwrap(), "");
/// assert!(normalize_relative_dir("../etc").is_err());
/// ```
pub fn normalize_relative_dir(raw: &str) -> ConfigResult<String> {
    let cleaned = sanitize_text_field(raw).replace('\\', "/");

    let mut segments = Vec::new();
    for segment in cleaned.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ConfigError::InvalidRelativePath(raw.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}/", segments.join("/")))
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
