//! Credential DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::credential::{Credential, CredentialData, Provider};

/// Request to store a credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCredential {
    pub name: String,
    pub data: CredentialData,
}

/// Credential listing entry without secret material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: Uuid,
    pub name: String,
    pub provider: Provider,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Credential> for CredentialSummary {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            provider: credential.provider(),
            name: credential.name,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

/// Optional provider filter for listing credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCredentialsQuery {
    pub provider: Option<Provider>,
}
