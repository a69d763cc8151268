//! Binary entry point that wires environment bootstrap, logging and Ctrl-C
//! handling, then launches the spoken conversation loop.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use talkback::assistant;
use talkback::config::{AppConfig, CONFIG_PATH};

/// Hands-free spoken conversation with a language model.
#[derive(Debug, Parser)]
#[command(name = "talkback", version, about)]
struct Args {
    /// JSON configuration file; defaults apply when it is missing.
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
/// Bootstraps environment variables and logging, then runs the voice loop
/// until the user interrupts it.
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    assistant::run_voice_assistant(config, cancel).await
}

/// First Ctrl-C stops the loop at its next check point; a second one exits.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received; stopping after the current step (Ctrl-C again to quit)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
