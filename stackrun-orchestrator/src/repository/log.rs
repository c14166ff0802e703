//! Log Repository
//!
//! Handles all database operations related to run logs.

use async_trait::async_trait;
use sqlx::PgPool;
use stackrun_core::domain::log::{LogRecord, StreamKind};
use uuid::Uuid;

/// Repository trait for persisted run output lines
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Persists one record
    ///
    /// Inserting a record whose `(run_id, sequence_num)` already exists is a
    /// no-op, so a retried write never produces a duplicate.
    async fn insert(&self, record: &LogRecord) -> Result<(), sqlx::Error>;

    /// All records of a run with `sequence_num > after_seq`, ascending
    async fn list_after(&self, run_id: Uuid, after_seq: i64)
    -> Result<Vec<LogRecord>, sqlx::Error>;

    /// Removes every record of a run, returning how many were deleted
    async fn delete_by_run(&self, run_id: Uuid) -> Result<u64, sqlx::Error>;
}

/// PostgreSQL implementation of LogRepository
pub struct PgLogRepository {
    pool: PgPool,
}

impl PgLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepository for PgLogRepository {
    async fn insert(&self, record: &LogRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO run_logs (id, run_id, content, stream_kind, sequence_num, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (run_id, sequence_num) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.run_id)
        .bind(&record.content)
        .bind(record.stream_kind.as_str())
        .bind(record.sequence_num)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_after(
        &self,
        run_id: Uuid,
        after_seq: i64,
    ) -> Result<Vec<LogRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, run_id, content, stream_kind, sequence_num, created_at
            FROM run_logs
            WHERE run_id = $1 AND sequence_num > $2
            ORDER BY sequence_num ASC
            "#,
        )
        .bind(run_id)
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LogRecord::try_from).collect()
    }

    async fn delete_by_run(&self, run_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM run_logs WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    run_id: Uuid,
    content: String,
    stream_kind: String,
    sequence_num: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<LogRow> for LogRecord {
    type Error = sqlx::Error;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let stream_kind = row
            .stream_kind
            .parse::<StreamKind>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(LogRecord {
            id: row.id,
            run_id: row.run_id,
            content: row.content,
            stream_kind,
            sequence_num: row.sequence_num,
            created_at: row.created_at,
        })
    }
}
