//! formrelay CLI
//!
//! Runs the submission relay one-shot, as an intake server with a background
//! worker, or replays relays that previously failed.

mod commands;

use clap::{Parser, Subcommand};
use commands::{CheckConfigCommand, RelayCommand, ReplayCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FORMRELAY_LOG_LEVEL",
        global = true
    )]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "FORMRELAY_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a single submission event and exit
    Relay(RelayCommand),
    /// Start the HTTP intake server and the relay worker
    Serve(ServeCommand),
    /// Resend relays recorded in the failed-relay log
    Replay(ReplayCommand),
    /// Validate a configuration file and print the result
    CheckConfig(CheckConfigCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()?
    } else {
        tracing_subscriber::EnvFilter::try_new(format!(
            "formrelay={level},\
             formrelay_cli={level},\
             formrelay_core={level},\
             formrelay_relay={level},\
             h2=warn,\
             tower=warn,\
             hyper=warn,\
             reqwest=warn",
            level = cli.log_level
        ))?
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Relay(cmd) => cmd.execute(),
        Commands::Serve(cmd) => cmd.execute(),
        Commands::Replay(cmd) => cmd.execute(),
        Commands::CheckConfig(cmd) => cmd.execute(),
    }
}
