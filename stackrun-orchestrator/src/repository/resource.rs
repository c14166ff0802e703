//! Resource Repository
//!
//! Handles all database operations related to stored manifests.

use async_trait::async_trait;
use sqlx::PgPool;
use stackrun_core::domain::resource::CloudResource;
use uuid::Uuid;

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create(&self, resource: &CloudResource) -> Result<(), sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CloudResource>, sqlx::Error>;
}

/// PostgreSQL implementation of ResourceRepository
pub struct PgResourceRepository {
    pool: PgPool,
}

impl PgResourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn create(&self, resource: &CloudResource) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO cloud_resources (id, name, kind, manifest, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(resource.id)
        .bind(&resource.name)
        .bind(&resource.kind)
        .bind(&resource.manifest)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CloudResource>, sqlx::Error> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT id, name, kind, manifest, created_at, updated_at
            FROM cloud_resources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    name: String,
    kind: String,
    manifest: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ResourceRow> for CloudResource {
    fn from(row: ResourceRow) -> Self {
        CloudResource {
            id: row.id,
            name: row.name,
            kind: row.kind,
            manifest: row.manifest,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
