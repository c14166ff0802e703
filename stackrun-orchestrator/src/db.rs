use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create cloud resources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cloud_resources (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            kind VARCHAR(255) NOT NULL,
            manifest TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create credentials table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            provider VARCHAR(50) NOT NULL,
            data JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_credentials_provider ON credentials(provider, created_at)",
    )
    .execute(pool)
    .await?;

    // Create runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id UUID PRIMARY KEY,
            resource_id UUID NOT NULL,
            status VARCHAR(50) NOT NULL,
            output JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create run logs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_logs (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            stream_kind VARCHAR(10) NOT NULL,
            sequence_num BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (run_id, sequence_num)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for run queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_resource_id ON runs(resource_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at DESC)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
