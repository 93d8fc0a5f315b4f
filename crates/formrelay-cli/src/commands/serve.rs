//! Intake server: accepts entry events over HTTP and relays them from a
//! background worker.

use clap::Args;
use formrelay_relay::listener::DEFAULT_QUEUE_CAPACITY;
use formrelay_relay::{configure_routes, IntakeState, RelayQueue, RelayWorker, SubmissionPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::load_config;

#[derive(Args)]
pub struct ServeCommand {
    /// Relay settings file (YAML)
    #[arg(long, env = "FORMRELAY_CONFIG")]
    pub config: PathBuf,

    /// Address the intake server listens on
    #[arg(long, default_value = "127.0.0.1:8080", env = "FORMRELAY_ADDRESS")]
    pub address: String,

    /// Shared secret callers must send as X-Intake-Token
    #[arg(long, env = "FORMRELAY_INTAKE_TOKEN")]
    pub intake_token: Option<String>,

    /// Events buffered before the intake answers 503
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = Arc::new(load_config(&self.config)?);
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(config))
    }

    async fn run(self, config: Arc<formrelay_core::RelayConfig>) -> anyhow::Result<()> {
        let form_id = config.form_id;
        let pipeline = Arc::new(SubmissionPipeline::from_config(config)?);

        let (queue, receiver) = RelayQueue::bounded(self.queue_capacity);
        let worker = RelayWorker::new(pipeline, receiver);
        worker.start().await;

        if self.intake_token.is_none() {
            info!("No intake token configured, POST /entries is open");
        }
        let state = Arc::new(IntakeState::new(queue, self.intake_token));
        let app = configure_routes().with_state(state);

        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c signal: {}", e);
                return;
            }
            info!("Received Ctrl+C, initiating graceful shutdown...");
            signal_token.cancel();
        });

        let listener = TcpListener::bind(&self.address).await?;
        info!(
            "Intake server listening on {} for form {}",
            self.address, form_id
        );

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        worker.stop().await;
        info!("Intake server exited");
        server?;
        Ok(())
    }
}
