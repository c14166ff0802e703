//! Credential domain types
//!
//! A single stored credential per provider is the active one; deploys pick the
//! first credential stored for the provider that owns the resource kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cloud provider owning a family of resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
    Auth0,
    Atlas,
    Cloudflare,
    Confluent,
    Snowflake,
    Kubernetes,
    DigitalOcean,
    Civo,
}

/// Kind-name prefixes, checked in order
const KIND_PREFIXES: &[(&str, Provider)] = &[
    ("Aws", Provider::Aws),
    ("Gcp", Provider::Gcp),
    ("Azure", Provider::Azure),
    ("Auth0", Provider::Auth0),
    ("Atlas", Provider::Atlas),
    ("Cloudflare", Provider::Cloudflare),
    ("Confluent", Provider::Confluent),
    ("Snowflake", Provider::Snowflake),
    ("Kubernetes", Provider::Kubernetes),
    ("DigitalOcean", Provider::DigitalOcean),
    ("Civo", Provider::Civo),
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
            Provider::Auth0 => "auth0",
            Provider::Atlas => "atlas",
            Provider::Cloudflare => "cloudflare",
            Provider::Confluent => "confluent",
            Provider::Snowflake => "snowflake",
            Provider::Kubernetes => "kubernetes",
            Provider::DigitalOcean => "digital_ocean",
            Provider::Civo => "civo",
        }
    }

    /// Name of the provider's directory in a module tree
    pub fn module_dir_name(&self) -> String {
        self.as_str().replace('_', "")
    }

    /// Determine the provider of a resource kind such as `AwsVpc` or
    /// `PostgresKubernetes`
    pub fn from_kind_name(kind: &str) -> Option<Provider> {
        if let Some((_, provider)) = KIND_PREFIXES
            .iter()
            .find(|(prefix, _)| kind.starts_with(prefix) && kind.len() > prefix.len())
        {
            return Some(*provider);
        }

        // Older kind names carry the platform as a suffix
        if kind.len() > "Kubernetes".len() && kind.ends_with("Kubernetes") {
            return Some(Provider::Kubernetes);
        }
        if kind.len() > "Atlas".len() && kind.ends_with("Atlas") {
            return Some(Provider::Atlas);
        }

        None
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KIND_PREFIXES
            .iter()
            .map(|(_, provider)| *provider)
            .find(|provider| provider.as_str() == s)
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

/// A stored credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub name: String,
    pub data: CredentialData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn provider(&self) -> Provider {
        self.data.provider()
    }
}

/// Provider-specific secret material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialData {
    Aws(AwsCredential),
    Gcp(GcpCredential),
    Azure(AzureCredential),
    Auth0(Auth0Credential),
}

impl CredentialData {
    pub fn provider(&self) -> Provider {
        match self {
            CredentialData::Aws(_) => Provider::Aws,
            CredentialData::Gcp(_) => Provider::Gcp,
            CredentialData::Azure(_) => Provider::Azure,
            CredentialData::Auth0(_) => Provider::Auth0,
        }
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let checks: Vec<(&'static str, &str)> = match self {
            CredentialData::Aws(c) => vec![
                ("account_id", c.account_id.as_str()),
                ("access_key_id", c.access_key_id.as_str()),
                ("secret_access_key", c.secret_access_key.as_str()),
            ],
            CredentialData::Gcp(c) => {
                vec![("service_account_key_base64", c.service_account_key_base64.as_str())]
            }
            CredentialData::Azure(c) => vec![
                ("client_id", c.client_id.as_str()),
                ("client_secret", c.client_secret.as_str()),
                ("tenant_id", c.tenant_id.as_str()),
                ("subscription_id", c.subscription_id.as_str()),
            ],
            CredentialData::Auth0(c) => vec![
                ("domain", c.domain.as_str()),
                ("client_id", c.client_id.as_str()),
                ("client_secret", c.client_secret.as_str()),
            ],
        };

        checks
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsCredential {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpCredential {
    pub service_account_key_base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureCredential {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth0Credential {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_kind_prefix() {
        assert_eq!(Provider::from_kind_name("AwsVpc"), Some(Provider::Aws));
        assert_eq!(Provider::from_kind_name("GcpCloudSql"), Some(Provider::Gcp));
        assert_eq!(
            Provider::from_kind_name("DigitalOceanVolume"),
            Some(Provider::DigitalOcean)
        );
        assert_eq!(
            Provider::from_kind_name("KubernetesNats"),
            Some(Provider::Kubernetes)
        );
    }

    #[test]
    fn test_provider_from_kind_suffix() {
        assert_eq!(
            Provider::from_kind_name("PostgresKubernetes"),
            Some(Provider::Kubernetes)
        );
        assert_eq!(
            Provider::from_kind_name("MongodbAtlas"),
            Some(Provider::Atlas)
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(Provider::from_kind_name("Widget"), None);
        assert_eq!(Provider::from_kind_name("Aws"), None);
        assert_eq!(Provider::from_kind_name(""), None);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("digital_ocean".parse::<Provider>(), Ok(Provider::DigitalOcean));
        assert_eq!(Provider::DigitalOcean.module_dir_name(), "digitalocean");
        assert!("openstack".parse::<Provider>().is_err());
    }

    #[test]
    fn test_missing_fields() {
        let data = CredentialData::Aws(AwsCredential {
            account_id: "123".to_string(),
            access_key_id: "".to_string(),
            secret_access_key: "secret".to_string(),
            region: None,
            session_token: None,
        });
        assert_eq!(data.missing_fields(), vec!["access_key_id"]);
        assert_eq!(data.provider(), Provider::Aws);
    }
}
