//! Loom CLI
//!
//! Command-line interface for the Loom execution core. Runs the whole stack
//! in-process against the simulated backend: useful for demos and for
//! inspecting what a given intent turns into.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "Loom execution orchestrator CLI", long_about = None)]
struct Cli {
    /// Session identifier attached to executions
    #[arg(long, env = "LOOM_SESSION", default_value = "cli")]
    session: String,

    /// User identifier attached to executions
    #[arg(long, env = "LOOM_USER", default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loom=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    handle_command(cli.command, &cli.session, &cli.user).await
}
