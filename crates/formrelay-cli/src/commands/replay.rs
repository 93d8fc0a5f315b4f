use anyhow::bail;
use clap::Args;
use colored::Colorize;
use formrelay_relay::SubmissionPipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{load_config, OutputFormat};

#[derive(Args)]
pub struct ReplayCommand {
    /// Relay settings file (YAML)
    #[arg(long, env = "FORMRELAY_CONFIG")]
    pub config: PathBuf,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl ReplayCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = Arc::new(load_config(&self.config)?);
        if config.failed_relay_log.is_none() {
            bail!("No failed_relay_log configured, nothing to replay");
        }

        let rt = tokio::runtime::Runtime::new()?;
        let summary = rt.block_on(async {
            let pipeline = SubmissionPipeline::from_config(config)?;
            let Some(store) = pipeline.failure_store() else {
                bail!("Failed-relay store is not available");
            };
            info!("Replaying failed relays");
            anyhow::Ok(pipeline.replay_failed(store.as_ref()).await?)
        })?;

        match self.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Text => {
                println!(
                    "{} replayed, {} delivered, {} still failing",
                    summary.replayed.to_string().bright_white().bold(),
                    summary.delivered.to_string().bright_green(),
                    if summary.still_failing > 0 {
                        summary.still_failing.to_string().bright_red()
                    } else {
                        summary.still_failing.to_string().normal()
                    }
                );
            }
        }

        Ok(())
    }
}
