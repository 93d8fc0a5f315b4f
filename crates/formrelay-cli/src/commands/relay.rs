//! One-shot relay of a single submission event.

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use formrelay_relay::{EntryCreated, PipelineOutcome, RelayOutcome, SubmissionPipeline};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{load_config, OutputFormat};

#[derive(Args)]
pub struct RelayCommand {
    /// Relay settings file (YAML)
    #[arg(long, env = "FORMRELAY_CONFIG")]
    pub config: PathBuf,

    /// Entry created event (JSON file, `-` for stdin)
    #[arg(long)]
    pub event: PathBuf,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl RelayCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = Arc::new(load_config(&self.config)?);
        let event = read_event(&self.event)?;
        debug!(
            "Relaying entry {} of form {}",
            event.entry_id, event.form_id
        );

        let rt = tokio::runtime::Runtime::new()?;
        let outcome = rt.block_on(async {
            let pipeline = SubmissionPipeline::from_config(config)?;
            anyhow::Ok(pipeline.handle(&event).await)
        })?;

        match self.output {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome_json(event.entry_id, &outcome))?
                );
            }
            OutputFormat::Text => {
                let line = format!("Entry {}: {}", event.entry_id, outcome);
                if outcome.is_delivered() {
                    println!("{}", line.bright_green());
                } else if matches!(outcome, PipelineOutcome::Skipped(_)) {
                    println!("{}", line.bright_yellow());
                } else {
                    println!("{}", line.bright_red());
                }
            }
        }

        Ok(())
    }
}

fn read_event(path: &Path) -> anyhow::Result<EntryCreated> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event {}", path.display()))?
    };

    serde_json::from_str(&raw).context("Invalid entry created event")
}

fn outcome_json(entry_id: i64, outcome: &PipelineOutcome) -> serde_json::Value {
    match outcome {
        PipelineOutcome::Skipped(reason) => serde_json::json!({
            "entry_id": entry_id,
            "result": "skipped",
            "reason": reason.to_string(),
        }),
        PipelineOutcome::Relayed {
            outcome: RelayOutcome::Completed { status, body },
            attempts,
            attachments,
        } => serde_json::json!({
            "entry_id": entry_id,
            "result": if (200..300).contains(status) { "delivered" } else { "rejected" },
            "status": status,
            "body": body,
            "attempts": attempts,
            "attachments": attachments,
        }),
        PipelineOutcome::Relayed {
            outcome: RelayOutcome::TransportError(message),
            attempts,
            attachments,
        } => serde_json::json!({
            "entry_id": entry_id,
            "result": "transport_error",
            "error": message,
            "attempts": attempts,
            "attachments": attachments,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formrelay_relay::SkipReason;

    #[test]
    fn test_outcome_json() {
        let skipped = outcome_json(7, &PipelineOutcome::Skipped(SkipReason::NoFiles));
        assert_eq!(skipped["result"], "skipped");
        assert_eq!(skipped["reason"], "submission has no files");

        let rejected = outcome_json(
            7,
            &PipelineOutcome::Relayed {
                outcome: RelayOutcome::Completed {
                    status: 422,
                    body: "bad".to_string(),
                },
                attempts: 1,
                attachments: 2,
            },
        );
        assert_eq!(rejected["result"], "rejected");
        assert_eq!(rejected["status"], 422);
    }

    #[test]
    fn test_read_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, r#"{"entry_id": 3, "form_id": 4, "item_meta": {}}"#).unwrap();

        let event = read_event(&path).unwrap();
        assert_eq!(event.entry_id, 3);

        std::fs::write(&path, "{").unwrap();
        assert!(read_event(&path).is_err());
    }
}
