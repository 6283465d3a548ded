//! CLI commands module.

mod agent;
mod helpers;
mod onboard;
mod start;
mod tasks;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use agent::cmd_agent;
pub use onboard::cmd_onboard;
pub use start::cmd_start;
pub use tasks::{cmd_tasks, TasksAction};

#[derive(Parser)]
#[command(name = "postpilot", about = "postpilot — automated content publishing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and workspace.
    Onboard,

    /// Run the agent (one-shot or interactive).
    Agent {
        /// Single message to process (non-interactive).
        #[arg(short, long)]
        message: Option<String>,

        /// Provider override (e.g. "anthropic").
        #[arg(short, long)]
        provider: Option<String>,

        /// Model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Start the full daemon (scheduler + agent + channel).
    Start,

    /// Inspect the one-time task queue.
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => cmd_onboard().await,
        Commands::Agent {
            message,
            provider,
            model,
        } => cmd_agent(message, provider, model).await,
        Commands::Start => cmd_start().await,
        Commands::Tasks { action } => cmd_tasks(action).await,
    }
}
