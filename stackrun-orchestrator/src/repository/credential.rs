//! Credential Repository
//!
//! Handles all database operations related to stored credentials.
//! Secret material is kept as a JSONB document tagged with its provider.

use async_trait::async_trait;
use sqlx::PgPool;
use stackrun_core::domain::credential::{Credential, CredentialData, Provider};
use uuid::Uuid;

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn create(&self, credential: &Credential) -> Result<(), sqlx::Error>;

    /// The earliest stored credential for a provider
    async fn first_for_provider(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, sqlx::Error>;

    /// Oldest first, optionally restricted to one provider
    async fn list(&self, provider: Option<Provider>) -> Result<Vec<Credential>, sqlx::Error>;
}

/// PostgreSQL implementation of CredentialRepository
pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn create(&self, credential: &Credential) -> Result<(), sqlx::Error> {
        let data = serde_json::to_value(&credential.data)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO credentials (id, name, provider, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(credential.id)
        .bind(&credential.name)
        .bind(credential.provider().as_str())
        .bind(data)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn first_for_provider(
        &self,
        provider: Provider,
    ) -> Result<Option<Credential>, sqlx::Error> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, name, data, created_at, updated_at
            FROM credentials
            WHERE provider = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Credential::try_from).transpose()
    }

    async fn list(&self, provider: Option<Provider>) -> Result<Vec<Credential>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, name, data, created_at, updated_at
            FROM credentials
            WHERE ($1::varchar IS NULL OR provider = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(provider.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Credential::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    name: String,
    data: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = sqlx::Error;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let data: CredentialData =
            serde_json::from_value(row.data).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Credential {
            id: row.id,
            name: row.name,
            data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
