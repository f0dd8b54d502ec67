//! PostgreSQL job store
//!
//! Creation notifications come from an `AFTER INSERT` trigger through
//! `LISTEN/NOTIFY`, so jobs inserted by other processes (an external trigger
//! endpoint, a second scheduler) reach this orchestrator too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retrain_core::domain::job::{FailureStage, JobStatus, TrainingJob};
use retrain_core::domain::model::ModelVersion;
use retrain_core::dto::job::{Conflict, CreateJob, JobCreated, Transition, UpdateOutcome};
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::StoreError;
use super::job::{EVENT_CHANNEL_CAPACITY, JobStore};
use crate::db::JOB_CREATED_CHANNEL;

const JOB_COLUMNS: &str = "id, model_name, status, training_config, triggered_at, started_at, \
     completed_at, failed_at, rejected_at, evaluation, error, failure_stage, model_version";

pub struct PgJobStore {
    pool: PgPool,
    events: broadcast::Sender<JobCreated>,
}

impl PgJobStore {
    /// Starts listening for creation notifications on `pool`
    ///
    /// Migrations must already have run.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(JOB_CREATED_CHANNEL).await?;
        tokio::spawn(forward_notifications(listener, events.clone()));

        Ok(Self { pool, events })
    }

    async fn active_job(&self, model_name: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM training_jobs WHERE model_name = $1 AND status = 'training' LIMIT 1",
        )
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

/// Relays NOTIFY payloads into the broadcast channel
///
/// `PgListener` reconnects on its own after a dropped connection; notifications
/// sent while disconnected are lost, which the orchestrator's periodic sweep
/// makes up for.
async fn forward_notifications(mut listener: PgListener, events: broadcast::Sender<JobCreated>) {
    loop {
        match listener.recv().await {
            Ok(notification) => match notification.payload().parse::<Uuid>() {
                Ok(job_id) => {
                    debug!("Notification for job {}", job_id);
                    let _ = events.send(JobCreated { job_id });
                }
                Err(e) => warn!(
                    "Ignoring malformed job notification '{}': {}",
                    notification.payload(),
                    e
                ),
            },
            Err(e) => {
                error!("Job notification listener error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, req: CreateJob) -> Result<TrainingJob, StoreError> {
        let job = TrainingJob::triggered(req, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO training_jobs (id, model_name, status, training_config, triggered_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.id)
        .bind(&job.model_name)
        .bind(job.status.as_str())
        .bind(serde_json::to_value(job.training_config)?)
        .bind(job.triggered_at)
        .execute(&self.pool)
        .await?;

        debug!("Job {} created for model '{}'", job.id, job.model_name);
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TrainingJob>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM training_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TrainingJob::try_from).transpose()
    }

    async fn update(&self, id: Uuid, transition: Transition) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM training_jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut job = TrainingJob::try_from(row.ok_or(StoreError::NotFound(id))?)?;

        if job.status != transition.source() {
            return Ok(UpdateOutcome::Conflict(Conflict::StatusChanged {
                current: job.status,
            }));
        }

        if transition.target() == JobStatus::Training {
            let active = sqlx::query_scalar::<_, Uuid>(
                r#"
                SELECT id FROM training_jobs
                WHERE model_name = $1 AND status = 'training' AND id <> $2
                LIMIT 1
                "#,
            )
            .bind(&job.model_name)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(active_job) = active {
                return Ok(UpdateOutcome::Conflict(Conflict::ModelBusy { active_job }));
            }
        }

        job.apply(transition)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        match write_job(&mut tx, &job).await {
            Ok(()) => {}
            // A concurrent claim committed between our check and our write
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                drop(tx);
                let active_job = self.active_job(&job.model_name).await?.unwrap_or_else(Uuid::nil);
                return Ok(UpdateOutcome::Conflict(Conflict::ModelBusy { active_job }));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(UpdateOutcome::Applied(job))
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<TrainingJob>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM training_jobs WHERE status = $1 ORDER BY triggered_at ASC",
            JOB_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrainingJob::try_from).collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<JobCreated> {
        self.events.subscribe()
    }
}

async fn write_job(tx: &mut Transaction<'_, Postgres>, job: &TrainingJob) -> Result<(), sqlx::Error> {
    let evaluation = job
        .evaluation
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        UPDATE training_jobs
        SET status = $2, started_at = $3, completed_at = $4, failed_at = $5,
            rejected_at = $6, evaluation = $7, error = $8, failure_stage = $9,
            model_version = $10
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(job.status.as_str())
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.failed_at)
    .bind(job.rejected_at)
    .bind(evaluation)
    .bind(&job.error)
    .bind(job.failure_stage.map(|stage| stage.as_str()))
    .bind(job.model_version.as_ref().map(ModelVersion::as_str))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    model_name: String,
    status: String,
    training_config: serde_json::Value,
    triggered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    evaluation: Option<serde_json::Value>,
    error: Option<String>,
    failure_stage: Option<String>,
    model_version: Option<String>,
}

impl TryFrom<JobRow> for TrainingJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse().map_err(StoreError::Corrupt)?;
        let failure_stage: Option<FailureStage> = row
            .failure_stage
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(StoreError::Corrupt)?;
        let evaluation = row.evaluation.map(serde_json::from_value).transpose()?;

        Ok(TrainingJob {
            id: row.id,
            model_name: row.model_name,
            status,
            training_config: serde_json::from_value(row.training_config)?,
            triggered_at: row.triggered_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            rejected_at: row.rejected_at,
            evaluation,
            error: row.error,
            failure_stage,
            model_version: row.model_version.map(ModelVersion::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrain_core::domain::config::TrainingConfig;

    fn row(status: &str) -> JobRow {
        JobRow {
            id: Uuid::new_v4(),
            model_name: "outage_model".to_string(),
            status: status.to_string(),
            training_config: serde_json::to_value(TrainingConfig::default()).unwrap(),
            triggered_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            rejected_at: None,
            evaluation: None,
            error: None,
            failure_stage: None,
            model_version: None,
        }
    }

    #[test]
    fn test_row_conversion() {
        let mut failed = row("failed");
        failed.error = Some("no reports".to_string());
        failed.failure_stage = Some("training".to_string());

        let job = TrainingJob::try_from(failed).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_stage, Some(FailureStage::Training));
        assert_eq!(job.training_config, TrainingConfig::default());
    }

    #[test]
    fn test_row_with_unknown_status_is_corrupt() {
        let result = TrainingJob::try_from(row("queued"));
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
