//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod credential;
mod resource;
mod run;

pub use credential::CredentialCommands;
pub use resource::ResourceCommands;
pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use uuid::Uuid;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Cloud resource manifests
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },
    /// Provider credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },
    /// Deploy a stored resource
    Deploy {
        /// Resource ID
        resource_id: Uuid,

        /// Stream the run's output until it finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Inspect runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Show a run's output
    Logs {
        /// Run ID
        run_id: Uuid,

        /// Keep streaming until the run finishes
        #[arg(short, long)]
        follow: bool,

        /// Only show lines after this sequence number
        #[arg(long)]
        after: Option<i64>,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Resource { command } => resource::handle_resource_command(command, config).await,
        Commands::Credential { command } => {
            credential::handle_credential_command(command, config).await
        }
        Commands::Deploy {
            resource_id,
            follow,
        } => run::deploy(&config.client(), resource_id, follow).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Logs {
            run_id,
            follow,
            after,
        } => run::show_logs(&config.client(), run_id, follow, after).await,
    }
}
