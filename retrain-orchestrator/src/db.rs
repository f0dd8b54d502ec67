use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

/// Channel the insert trigger publishes new job IDs on
pub const JOB_CREATED_CHANNEL: &str = "training_job_created";

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_jobs (
            id UUID PRIMARY KEY,
            model_name VARCHAR(255) NOT NULL,
            status VARCHAR(32) NOT NULL,
            training_config JSONB NOT NULL,
            triggered_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            failed_at TIMESTAMPTZ,
            rejected_at TIMESTAMPTZ,
            evaluation JSONB,
            error TEXT,
            failure_stage VARCHAR(32),
            model_version VARCHAR(64)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_training_jobs_status ON training_jobs(status, triggered_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_training_jobs_model ON training_jobs(model_name, triggered_at DESC)",
    )
    .execute(pool)
    .await?;

    // At most one training job per model, enforced by the database itself
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_training_jobs_one_active
        ON training_jobs(model_name)
        WHERE status = 'training'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION notify_training_job_created() RETURNS trigger AS $$
        BEGIN
            PERFORM pg_notify('training_job_created', NEW.id::text);
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("DROP TRIGGER IF EXISTS training_job_created ON training_jobs")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER training_job_created
        AFTER INSERT ON training_jobs
        FOR EACH ROW EXECUTE FUNCTION notify_training_job_created()
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
