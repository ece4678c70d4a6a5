//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod extract;
mod plan;
mod run;

use anyhow::Result;
use clap::Subcommand;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run an intent end to end against the simulated backend
    Run {
        /// What to build, in plain language
        intent: String,

        /// Seconds to keep the instance alive after completion
        #[arg(long, default_value = "0")]
        cooldown: u64,
    },
    /// Show the task pipeline an intent would produce, without running it
    Plan {
        /// What to build, in plain language
        intent: String,
    },
    /// Show the project specification extracted from an intent
    Extract {
        /// What to build, in plain language
        intent: String,

        /// Print the specification as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Routes a command to the appropriate handler module.
pub async fn handle_command(command: Commands, session: &str, user: &str) -> Result<()> {
    match command {
        Commands::Run { intent, cooldown } => run::handle_run(&intent, session, user, cooldown).await,
        Commands::Plan { intent } => plan::handle_plan(&intent, session).await,
        Commands::Extract { intent, json } => extract::handle_extract(&intent, session, json).await,
    }
}
