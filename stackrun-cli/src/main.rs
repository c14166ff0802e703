//! stackrun CLI
//!
//! Command-line interface for the stackrun orchestrator.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "stackrun")]
#[command(about = "Deploy cloud resources and follow their runs", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "STACKRUN_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Client diagnostics (stream reconnects) go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackrun_client=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
    };

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_logs_follow() {
        let cli = Cli::try_parse_from([
            "stackrun",
            "--orchestrator-url",
            "http://orchestrator:9000",
            "logs",
            "6f1c1a8e-3d0b-4b8e-9d55-0d7a4e7f0c11",
            "--follow",
            "--after",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.orchestrator_url, "http://orchestrator:9000");
        assert!(matches!(
            cli.command,
            Commands::Logs {
                follow: true,
                after: Some(3),
                ..
            }
        ));
    }
}
