use clap::Args;
use colored::Colorize;
use formrelay_core::{mask_sensitive, RelayConfig};
use std::path::PathBuf;

use super::{load_config, OutputFormat};

#[derive(Args)]
pub struct CheckConfigCommand {
    /// Relay settings file (YAML)
    #[arg(long, env = "FORMRELAY_CONFIG")]
    pub config: PathBuf,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl CheckConfigCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = load_config(&self.config)?;

        match self.output {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&config_json(&config))?)
            }
            OutputFormat::Text => print_text(&config),
        }
        Ok(())
    }
}

fn config_json(config: &RelayConfig) -> serde_json::Value {
    serde_json::json!({
        "form_id": config.form_id,
        "relay_url": config.relay_url.as_str(),
        "api_token": mask_sensitive(&config.api_token),
        "field_mappings": {
            "name": config.field_mappings.name,
            "date_of_birth": config.field_mappings.date_of_birth,
            "email": config.field_mappings.email,
            "files": config.field_mappings.files,
        },
        "doc_id_key": config.doc_id_key,
        "doc_type_key": config.doc_type_key,
        "attachment_dir": config.attachment_dir(),
        "send_key_names": config.send_key_names,
        "timeout_secs": config.timeout.as_secs(),
        "retry": config.retry,
        "normalize_permissions": config.normalize_permissions,
        "failed_relay_log": config.failed_relay_log,
        "attachment_manifest": config.attachment_manifest,
    })
}

fn print_text(config: &RelayConfig) {
    let row = |label: &str, value: String| {
        println!("{:>22} {}", label.bright_white().bold(), value.bright_cyan());
    };
    let or_unset = |value: &str| {
        if value.is_empty() {
            "(unset)".to_string()
        } else {
            value.to_string()
        }
    };

    println!("{}", "Configuration OK".bright_green().bold());
    println!();
    row("Form:", config.form_id.to_string());
    row("Relay URL:", config.relay_url.to_string());
    row("API token:", mask_sensitive(&config.api_token));
    row("Name field:", or_unset(&config.field_mappings.name));
    row("Birth date field:", or_unset(&config.field_mappings.date_of_birth));
    row("Email field:", or_unset(&config.field_mappings.email));
    row("Files field:", or_unset(&config.field_mappings.files));
    row("Document id key:", or_unset(&config.doc_id_key));
    row("Document type key:", or_unset(&config.doc_type_key));
    row("Attachments:", config.attachment_dir().display().to_string());
    row("Timeout:", format!("{}s", config.timeout.as_secs()));
    row("Max attempts:", config.retry.max_attempts.to_string());
    if let Some(path) = &config.failed_relay_log {
        row("Failed relay log:", path.display().to_string());
    }
}
