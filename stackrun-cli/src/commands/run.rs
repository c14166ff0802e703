//! Run command handlers
//!
//! Deploying, inspecting runs and streaming their output.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use stackrun_client::OrchestratorClient;
use stackrun_core::domain::log::StreamKind;
use stackrun_core::domain::run::{Run, RunStatus};
use stackrun_core::dto::log::{FrameStatus, StreamFrame};
use stackrun_core::dto::run::ListRunsQuery;
use uuid::Uuid;

use crate::config::Config;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Get run details
    Get {
        /// Run ID
        id: Uuid,
    },
    /// List runs, newest first
    List {
        /// Only runs of this resource
        #[arg(long)]
        resource_id: Option<Uuid>,

        /// Only runs in this status (pending, in_progress, success, failed)
        #[arg(long)]
        status: Option<RunStatus>,

        /// Page number, starting at 0
        #[arg(long, default_value = "0")]
        page: u32,

        /// Runs per page
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Delete a run's stored output
    DeleteLogs {
        /// Run ID
        id: Uuid,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::Get { id } => get_run(&client, id).await,
        RunCommands::List {
            resource_id,
            status,
            page,
            page_size,
        } => {
            let query = ListRunsQuery {
                resource_id,
                status,
                page_num: Some(page),
                page_size,
            };
            list_runs(&client, &query).await
        }
        RunCommands::DeleteLogs { id } => delete_logs(&client, id).await,
    }
}

/// Start a deployment, optionally following it to the end
pub async fn deploy(client: &OrchestratorClient, resource_id: Uuid, follow: bool) -> Result<()> {
    let run = client
        .deploy(resource_id)
        .await
        .context("Failed to start deployment")?;

    println!("{}", "✓ Deployment started".green().bold());
    println!("  Run ID: {}", run.id.to_string().cyan());

    if !follow {
        println!();
        println!(
            "Follow it with: {}",
            format!("stackrun logs {} --follow", run.id).cyan()
        );
        return Ok(());
    }

    println!();
    stream_to_end(client, run.id, None).await
}

/// Print a run's output
///
/// Finished runs are replayed in full. Unfinished runs are only streamed
/// with `follow`.
pub async fn show_logs(
    client: &OrchestratorClient,
    run_id: Uuid,
    follow: bool,
    after: Option<i64>,
) -> Result<()> {
    if !follow {
        let run = client.get_run(run_id).await?;
        if !run.status.is_terminal() {
            println!(
                "{}",
                format!(
                    "Run {} is {}; pass --follow to stream its output.",
                    run_id, run.status
                )
                .yellow()
            );
            return Ok(());
        }
    }

    stream_to_end(client, run_id, after).await
}

async fn stream_to_end(client: &OrchestratorClient, run_id: Uuid, after: Option<i64>) -> Result<()> {
    let mut frames = client.follow_run(run_id, after);

    println!("{}", "─".repeat(80).dimmed());
    let mut closing = None;
    while let Some(frame) = frames.next().await? {
        if frame.is_final() {
            closing = Some(frame.status);
            break;
        }
        print_frame(&frame);
    }
    println!("{}", "─".repeat(80).dimmed());

    if closing == Some(FrameStatus::Cancelled) {
        println!("{}", "Stream closed by the orchestrator.".yellow());
        return Ok(());
    }

    let run = client.get_run(run_id).await?;
    print_outcome(&run);

    if run.status == RunStatus::Failed {
        anyhow::bail!("Run {} failed", run_id);
    }
    Ok(())
}

async fn get_run(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let run = client.get_run(id).await?;
    print_run_details(&run);
    Ok(())
}

async fn list_runs(client: &OrchestratorClient, query: &ListRunsQuery) -> Result<()> {
    let page = client.list_runs(query).await?;

    if page.runs.is_empty() {
        println!("{}", "No runs found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Page {} of {} ({} run(s)):",
            query.page_num() + 1,
            page.total_pages.max(1),
            page.runs.len()
        )
        .bold()
    );
    println!();
    for run in &page.runs {
        print_run_summary(run);
    }

    Ok(())
}

async fn delete_logs(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let deleted = client.delete_run_logs(id).await?;

    println!(
        "{}",
        format!("✓ Deleted {} line(s) of output for run {}", deleted.deleted, deleted.run_id)
            .green()
    );
    Ok(())
}

fn print_frame(frame: &StreamFrame) {
    let prefix = format!("{:>5}", frame.sequence_num).dimmed();
    match frame.stream_kind {
        StreamKind::Stdout => println!("{} {}", prefix, frame.content),
        StreamKind::Stderr => println!("{} {}", prefix, frame.content.yellow()),
    }
}

fn print_outcome(run: &Run) {
    match run.status {
        RunStatus::Success => println!("{}", "✓ Deployment succeeded".green().bold()),
        RunStatus::Failed => {
            println!("{}", "✗ Deployment failed".red().bold());
            if let Some(error) = run.output.as_ref().and_then(|o| o.error.as_ref()) {
                println!("\n{}", error.red());
            }
        }
        _ => println!("Run is {}", colorize_status(&run.status)),
    }
}

fn print_run_summary(run: &Run) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Resource: {}", run.resource_id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(&run.status));
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run_details(run: &Run) {
    println!("{}", "Run Details:".bold());
    println!("  ID:          {}", run.id.to_string().cyan());
    println!("  Resource ID: {}", run.resource_id.to_string().dimmed());
    println!("  Status:      {}", colorize_status(&run.status));
    println!("  Created:     {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:     {}", run.updated_at.format("%Y-%m-%d %H:%M:%S"));

    if run.status.is_terminal() {
        let duration = run.updated_at.signed_duration_since(run.created_at);
        println!("  Duration:    {}s", duration.num_seconds());
    }

    let Some(output) = &run.output else {
        return;
    };

    println!("\n{}", "Output:".bold());
    if let Some(fqdn) = &output.stack_fqdn {
        println!("  Stack:       {}", fqdn);
    }
    if let Some(code) = output.exit_code {
        println!("  Exit Code:   {}", code);
    }
    if let Some(error) = &output.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

/// Colorize run status for display
fn colorize_status(status: &RunStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::InProgress => status_str.cyan(),
        RunStatus::Success => status_str.green(),
        RunStatus::Failed => status_str.red(),
    }
}
