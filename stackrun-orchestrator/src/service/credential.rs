//! Credential Service
//!
//! Stores provider credentials and resolves the one a deploy needs from the
//! resource kind alone. Each provider has a single active credential: the
//! first one stored.

use chrono::Utc;
use serde::Serialize;
use stackrun_core::domain::credential::{
    Auth0Credential, AwsCredential, AzureCredential, Credential, CredentialData, GcpCredential,
    Provider,
};
use stackrun_core::dto::credential::{CreateCredential, CredentialSummary};
use uuid::Uuid;

use crate::repository::Stores;
use crate::service::error::{Result, ServiceError};

/// Provider settings handed to the engine for one run
///
/// Serializes to the flat `provider_config` document the modules read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    Aws(AwsCredential),
    Gcp(GcpCredential),
    Azure(AzureCredential),
    Auth0(Auth0Credential),
}

impl ProviderConfig {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderConfig::Aws(_) => Provider::Aws,
            ProviderConfig::Gcp(_) => Provider::Gcp,
            ProviderConfig::Azure(_) => Provider::Azure,
            ProviderConfig::Auth0(_) => Provider::Auth0,
        }
    }
}

impl From<CredentialData> for ProviderConfig {
    fn from(data: CredentialData) -> Self {
        match data {
            CredentialData::Aws(c) => ProviderConfig::Aws(c),
            CredentialData::Gcp(c) => ProviderConfig::Gcp(c),
            CredentialData::Azure(c) => ProviderConfig::Azure(c),
            CredentialData::Auth0(c) => ProviderConfig::Auth0(c),
        }
    }
}

/// Providers whose credentials can be stored and resolved
pub fn is_supported(provider: Provider) -> bool {
    matches!(
        provider,
        Provider::Aws | Provider::Gcp | Provider::Azure | Provider::Auth0
    )
}

/// Resolve the provider configuration for a resource kind
///
/// Fails with `NotFound` for a kind that belongs to no known provider,
/// `Unimplemented` for a provider without credential support and
/// `FailedPrecondition` when nothing usable is stored for the provider.
pub async fn resolve(stores: &Stores, kind: &str) -> Result<ProviderConfig> {
    let provider = Provider::from_kind_name(kind).ok_or_else(|| {
        ServiceError::NotFound(format!("unknown cloud resource kind: {}", kind))
    })?;

    if !is_supported(provider) {
        return Err(ServiceError::Unimplemented(format!(
            "credential resolution for provider '{}' is not implemented",
            provider
        )));
    }

    let credential = stores
        .credentials
        .first_for_provider(provider)
        .await?
        .ok_or_else(|| {
            ServiceError::FailedPrecondition(format!(
                "no {} credential found; create one before deploying '{}' resources",
                provider, kind
            ))
        })?;

    let missing = credential.data.missing_fields();
    if !missing.is_empty() {
        return Err(ServiceError::FailedPrecondition(format!(
            "{} credential '{}' is missing required fields: {}",
            provider,
            credential.name,
            missing.join(", ")
        )));
    }

    tracing::debug!(
        provider = %provider,
        credential_id = %credential.id,
        "Resolved credential for kind {}",
        kind
    );

    Ok(credential.data.into())
}

/// Store a new credential
pub async fn create_credential(stores: &Stores, req: CreateCredential) -> Result<Credential> {
    if req.name.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(
            "credential name cannot be empty".to_string(),
        ));
    }

    let missing = req.data.missing_fields();
    if !missing.is_empty() {
        return Err(ServiceError::InvalidArgument(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let now = Utc::now();
    let credential = Credential {
        id: Uuid::new_v4(),
        name: req.name,
        data: req.data,
        created_at: now,
        updated_at: now,
    };

    stores.credentials.create(&credential).await?;

    tracing::info!(
        "Credential created: {} ({}) for provider {}",
        credential.name,
        credential.id,
        credential.provider()
    );

    Ok(credential)
}

/// List stored credentials without their secret material
pub async fn list_credentials(
    stores: &Stores,
    provider: Option<Provider>,
) -> Result<Vec<CredentialSummary>> {
    let credentials = stores.credentials.list(provider).await?;
    Ok(credentials.into_iter().map(CredentialSummary::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aws(name: &str, access_key_id: &str) -> CreateCredential {
        CreateCredential {
            name: name.to_string(),
            data: CredentialData::Aws(AwsCredential {
                account_id: "123456789012".to_string(),
                access_key_id: access_key_id.to_string(),
                secret_access_key: "secret".to_string(),
                region: Some("us-east-1".to_string()),
                session_token: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_kind() {
        let stores = Stores::in_memory();
        let result = resolve(&stores, "Widget").await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_unsupported_provider() {
        let stores = Stores::in_memory();
        let result = resolve(&stores, "CloudflareDnsZone").await;
        assert!(matches!(result, Err(ServiceError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn test_resolve_without_credential() {
        let stores = Stores::in_memory();
        let result = resolve(&stores, "AwsVpc").await;
        assert!(matches!(result, Err(ServiceError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn test_resolve_uses_first_credential() {
        let stores = Stores::in_memory();
        create_credential(&stores, aws("first", "AKIAFIRST"))
            .await
            .unwrap();
        create_credential(&stores, aws("second", "AKIASECOND"))
            .await
            .unwrap();

        let config = resolve(&stores, "AwsVpc").await.unwrap();
        assert_eq!(config.provider(), Provider::Aws);
        match config {
            ProviderConfig::Aws(aws) => assert_eq!(aws.access_key_id, "AKIAFIRST"),
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let stores = Stores::in_memory();
        let result = create_credential(&stores, aws("broken", "")).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));

        let result = create_credential(&stores, aws(" ", "AKIA")).await;
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_provider() {
        let stores = Stores::in_memory();
        create_credential(&stores, aws("aws", "AKIA")).await.unwrap();
        create_credential(
            &stores,
            CreateCredential {
                name: "gcp".to_string(),
                data: CredentialData::Gcp(GcpCredential {
                    service_account_key_base64: "e30=".to_string(),
                }),
            },
        )
        .await
        .unwrap();

        assert_eq!(list_credentials(&stores, None).await.unwrap().len(), 2);

        let gcp = list_credentials(&stores, Some(Provider::Gcp)).await.unwrap();
        assert_eq!(gcp.len(), 1);
        assert_eq!(gcp[0].name, "gcp");
    }

    #[test]
    fn test_provider_config_serializes_flat() {
        let config = ProviderConfig::Gcp(GcpCredential {
            service_account_key_base64: "e30=".to_string(),
        });
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["service_account_key_base64"], "e30=");
    }
}
