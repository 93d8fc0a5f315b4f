pub mod check_config;
pub mod relay;
pub mod replay;
pub mod serve;

pub use check_config::CheckConfigCommand;
pub use relay::RelayCommand;
pub use replay::ReplayCommand;
pub use serve::ServeCommand;

use anyhow::Context;
use formrelay_core::{RelayConfig, RelaySettings};
use std::path::Path;
use tracing::debug;

/// Output format shared by the commands
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Text,
    /// JSON output for automation and scripting
    Json,
}

/// Read the settings file, apply `FORMRELAY_*` environment overrides and
/// sanitize the result
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let mut settings = RelaySettings::from_file(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    settings.apply_env_overrides(|key| std::env::var(key).ok())?;

    let config = settings.sanitize().context("Invalid relay settings")?;
    debug!(
        "Loaded configuration for form {} relaying to {}",
        config.form_id, config.relay_url
    );
    Ok(config)
}
