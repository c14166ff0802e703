//! Resource command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use stackrun_client::OrchestratorClient;
use stackrun_core::domain::resource::CloudResource;
use uuid::Uuid;

use crate::config::Config;

/// Resource subcommands
#[derive(Subcommand)]
pub enum ResourceCommands {
    /// Store a manifest from a YAML file
    Create {
        /// Path to the manifest
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Get a stored resource
    Get {
        /// Resource ID
        id: Uuid,

        /// Also print the stored manifest
        #[arg(long)]
        manifest: bool,
    },
}

pub async fn handle_resource_command(command: ResourceCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ResourceCommands::Create { file } => create_resource(&client, &file).await,
        ResourceCommands::Get { id, manifest } => get_resource(&client, id, manifest).await,
    }
}

async fn create_resource(client: &OrchestratorClient, path: &Path) -> Result<()> {
    let manifest = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;

    let resource = client
        .create_resource(manifest)
        .await
        .context("Failed to store resource")?;

    println!("{}", "✓ Resource stored".green().bold());
    print_resource(&resource, false);
    println!();
    println!(
        "Deploy it with: {}",
        format!("stackrun deploy {} --follow", resource.id).cyan()
    );

    Ok(())
}

async fn get_resource(client: &OrchestratorClient, id: Uuid, manifest: bool) -> Result<()> {
    let resource = client.get_resource(id).await?;
    print_resource(&resource, manifest);
    Ok(())
}

fn print_resource(resource: &CloudResource, manifest: bool) {
    println!("  ID:       {}", resource.id.to_string().cyan());
    println!("  Name:     {}", resource.name.bold());
    println!("  Kind:     {}", resource.kind);
    println!(
        "  Created:  {}",
        resource.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if manifest {
        println!("\n{}", "Manifest:".bold());
        println!("{}", resource.manifest.trim_end());
    }
}
