//! Credential command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use serde_json::Value as JsonValue;
use stackrun_client::OrchestratorClient;
use stackrun_core::domain::credential::{CredentialData, Provider};
use stackrun_core::dto::credential::CredentialSummary;

use crate::config::Config;

/// Credential subcommands
#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Store credentials for a provider
    ///
    /// The file holds a JSON object with the provider's fields, for aws:
    /// {"account_id": "...", "access_key_id": "...", "secret_access_key": "..."}
    Create {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Provider (aws, gcp, azure, auth0)
        #[arg(short, long)]
        provider: Provider,

        /// Path to the JSON file with the provider fields
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List stored credentials
    List {
        /// Only show credentials for this provider
        #[arg(short, long)]
        provider: Option<Provider>,
    },
}

pub async fn handle_credential_command(
    command: CredentialCommands,
    config: &Config,
) -> Result<()> {
    let client = config.client();

    match command {
        CredentialCommands::Create {
            name,
            provider,
            file,
        } => create_credential(&client, name, provider, &file).await,
        CredentialCommands::List { provider } => list_credentials(&client, provider).await,
    }
}

async fn create_credential(
    client: &OrchestratorClient,
    name: String,
    provider: Provider,
    path: &Path,
) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credential file: {}", path.display()))?;
    let fields: JsonValue =
        serde_json::from_str(&content).context("Credential file is not valid JSON")?;
    let data = credential_data(provider, fields)?;

    let credential = client
        .create_credential(name, data)
        .await
        .context("Failed to store credential")?;

    println!("{}", "✓ Credential stored".green().bold());
    print_credential(&credential);

    Ok(())
}

async fn list_credentials(client: &OrchestratorClient, provider: Option<Provider>) -> Result<()> {
    let credentials = client.list_credentials(provider).await?;

    if credentials.is_empty() {
        println!("{}", "No credentials found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} credential(s):", credentials.len()).bold()
        );
        println!();
        for credential in credentials {
            print_credential(&credential);
        }
    }

    Ok(())
}

/// Pair provider-specific fields with their provider
fn credential_data(provider: Provider, fields: JsonValue) -> Result<CredentialData> {
    let tagged = serde_json::json!({ provider.as_str(): fields });
    serde_json::from_value(tagged)
        .with_context(|| format!("Invalid or unsupported {} credential", provider))
}

fn print_credential(credential: &CredentialSummary) {
    println!("  {} {}", "▸".cyan(), credential.name.bold());
    println!("    ID:       {}", credential.id.to_string().dimmed());
    println!("    Provider: {}", credential.provider);
    println!(
        "    Created:  {}",
        credential
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_data_tags_provider() {
        let fields = serde_json::json!({
            "domain": "acme.auth0.com",
            "client_id": "id",
            "client_secret": "secret"
        });
        let data = credential_data(Provider::Auth0, fields).unwrap();
        assert_eq!(data.provider(), Provider::Auth0);
        assert!(data.missing_fields().is_empty());
    }

    #[test]
    fn test_credential_data_rejects_unsupported_provider() {
        let fields = serde_json::json!({ "token": "x" });
        assert!(credential_data(Provider::Civo, fields).is_err());
    }

    #[test]
    fn test_credential_data_rejects_wrong_fields() {
        let fields = serde_json::json!({ "client_id": "id" });
        assert!(credential_data(Provider::Aws, fields).is_err());
    }
}
