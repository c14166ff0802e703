//! Run Repository
//!
//! Handles all database operations related to runs.

use async_trait::async_trait;
use sqlx::PgPool;
use stackrun_core::domain::run::{Run, RunOutput, RunStatus};
use uuid::Uuid;

/// Filters applied when listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub resource_id: Option<Uuid>,
    pub status: Option<RunStatus>,
}

impl RunFilter {
    pub fn matches(&self, run: &Run) -> bool {
        self.resource_id.is_none_or(|id| run.resource_id == id)
            && self.status.is_none_or(|status| run.status == status)
    }
}

/// Repository trait for run lifecycle rows
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Inserts a new run in `pending`
    async fn create(&self, resource_id: Uuid) -> Result<Run, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, sqlx::Error>;

    /// Newest first, `limit` rows starting at `offset`
    async fn list(
        &self,
        filter: &RunFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Run>, sqlx::Error>;

    async fn count(&self, filter: &RunFilter) -> Result<u64, sqlx::Error>;

    /// Moves a `pending` run to `in_progress`; false if it was not pending
    async fn mark_in_progress(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    /// Writes the terminal status and output if the run is not terminal yet
    ///
    /// Returns false when the run had already finished, in which case nothing
    /// is written.
    async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        output: &RunOutput,
    ) -> Result<bool, sqlx::Error>;
}

/// PostgreSQL implementation of RunRepository
pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create(&self, resource_id: Uuid) -> Result<Run, sqlx::Error> {
        let now = chrono::Utc::now();

        let run = Run {
            id: Uuid::new_v4(),
            resource_id,
            status: RunStatus::Pending,
            output: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO runs (id, resource_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(run.resource_id)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Run>, sqlx::Error> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, resource_id, status, output, created_at, updated_at
            FROM runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Run::try_from).transpose()
    }

    async fn list(
        &self,
        filter: &RunFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Run>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, resource_id, status, output, created_at, updated_at
            FROM runs
            WHERE ($1::uuid IS NULL OR resource_id = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.resource_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(i64::from(limit))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Run::try_from).collect()
    }

    async fn count(&self, filter: &RunFilter) -> Result<u64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE ($1::uuid IS NULL OR resource_id = $1)
              AND ($2::varchar IS NULL OR status = $2)
            "#,
        )
        .bind(filter.resource_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0.max(0) as u64)
    }

    async fn mark_in_progress(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'in_progress', updated_at = $1
            WHERE id = $2 AND status = 'pending'
            "#,
        )
        .bind(chrono::Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: Uuid,
        status: RunStatus,
        output: &RunOutput,
    ) -> Result<bool, sqlx::Error> {
        let output = serde_json::to_value(output)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $1, output = $2, updated_at = $3
            WHERE id = $4 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(status.as_str())
        .bind(output)
        .bind(chrono::Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    resource_id: Uuid,
    status: String,
    output: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<RunRow> for Run {
    type Error = sqlx::Error;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        let output = row
            .output
            .map(serde_json::from_value::<RunOutput>)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Run {
            id: row.id,
            resource_id: row.resource_id,
            status,
            output,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
