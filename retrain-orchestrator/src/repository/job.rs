//! Job store
//!
//! Durable home of `TrainingJob` records plus the creation notifications the
//! orchestrator subscribes to. Every status change goes through `update`,
//! which is a compare-and-set on the job's status.

use async_trait::async_trait;
use chrono::Utc;
use retrain_core::domain::job::{JobStatus, TrainingJob};
use retrain_core::dto::job::{CreateJob, Conflict, JobCreated, Transition, UpdateOutcome};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::error::StoreError;

/// Capacity of the creation notification channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Storage contract for training jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job in `Triggered` and notifies subscribers
    async fn create(&self, req: CreateJob) -> Result<TrainingJob, StoreError>;

    /// Fetches a job by ID
    async fn get(&self, id: Uuid) -> Result<Option<TrainingJob>, StoreError>;

    /// Applies `transition` if the job is still in the transition's source status
    ///
    /// A move to `Training` additionally claims the per-model training slot:
    /// it conflicts with `ModelBusy` if another job for the same model is
    /// already training. The check and the write are one atomic step.
    async fn update(&self, id: Uuid, transition: Transition) -> Result<UpdateOutcome, StoreError>;

    /// Lists jobs in a status, oldest trigger first
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<TrainingJob>, StoreError>;

    /// Subscribes to job creation notifications
    ///
    /// Notifications may be delivered more than once; receivers must tolerate
    /// replays.
    fn subscribe(&self) -> broadcast::Receiver<JobCreated>;
}

/// In-memory job store
///
/// Used when no database is configured and as the test double for the
/// orchestrator. Jobs do not survive a restart.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, TrainingJob>>,
    /// Applied statuses per job, in write order
    history: Mutex<HashMap<Uuid, Vec<JobStatus>>>,
    events: broadcast::Sender<JobCreated>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Re-sends the creation notification for an existing job
    pub fn renotify(&self, job_id: Uuid) {
        let _ = self.events.send(JobCreated { job_id });
    }

    /// Every status the job has been written with, starting at `Triggered`
    pub fn status_history(&self, job_id: Uuid) -> Vec<JobStatus> {
        lock(&self.history).get(&job_id).cloned().unwrap_or_default()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, req: CreateJob) -> Result<TrainingJob, StoreError> {
        let job = TrainingJob::triggered(req, Utc::now());

        lock(&self.jobs).insert(job.id, job.clone());
        lock(&self.history).insert(job.id, vec![JobStatus::Triggered]);

        debug!("Job {} created for model '{}'", job.id, job.model_name);
        // No subscribers yet is not an error; the orchestrator sweeps on start
        let _ = self.events.send(JobCreated { job_id: job.id });

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TrainingJob>, StoreError> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    async fn update(&self, id: Uuid, transition: Transition) -> Result<UpdateOutcome, StoreError> {
        let mut jobs = lock(&self.jobs);

        let job = jobs.get(&id).ok_or(StoreError::NotFound(id))?;
        if job.status != transition.source() {
            return Ok(UpdateOutcome::Conflict(Conflict::StatusChanged {
                current: job.status,
            }));
        }

        if transition.target() == JobStatus::Training {
            let model_name = job.model_name.clone();
            if let Some(active) = jobs.values().find(|other| {
                other.id != id
                    && other.model_name == model_name
                    && other.status == JobStatus::Training
            }) {
                return Ok(UpdateOutcome::Conflict(Conflict::ModelBusy {
                    active_job: active.id,
                }));
            }
        }

        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(transition)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let updated = job.clone();
        drop(jobs);

        lock(&self.history)
            .entry(id)
            .or_default()
            .push(updated.status);

        Ok(UpdateOutcome::Applied(updated))
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<TrainingJob>, StoreError> {
        let mut jobs: Vec<TrainingJob> = lock(&self.jobs)
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.triggered_at);
        Ok(jobs)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobCreated> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrain_core::domain::config::TrainingConfig;

    fn request(model: &str) -> CreateJob {
        CreateJob::new(model, TrainingConfig::default())
    }

    #[tokio::test]
    async fn test_create_notifies_subscribers() {
        let store = InMemoryJobStore::new();
        let mut events = store.subscribe();

        let job = store.create(request("outage_model")).await.unwrap();
        assert_eq!(job.status, JobStatus::Triggered);
        assert_eq!(events.recv().await.unwrap(), JobCreated { job_id: job.id });
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = InMemoryJobStore::new();
        let job = store.create(request("outage_model")).await.unwrap();

        let first = store.update(job.id, Transition::start(Utc::now())).await.unwrap();
        assert!(matches!(first, UpdateOutcome::Applied(ref j) if j.status == JobStatus::Training));

        let second = store.update(job.id, Transition::start(Utc::now())).await.unwrap();
        assert!(matches!(
            second,
            UpdateOutcome::Conflict(Conflict::StatusChanged {
                current: JobStatus::Training
            })
        ));
    }

    #[tokio::test]
    async fn test_one_training_job_per_model() {
        let store = InMemoryJobStore::new();
        let a = store.create(request("outage_model")).await.unwrap();
        let b = store.create(request("outage_model")).await.unwrap();
        let other = store.create(request("other_model")).await.unwrap();

        store.update(a.id, Transition::start(Utc::now())).await.unwrap();

        let outcome = store.update(b.id, Transition::start(Utc::now())).await.unwrap();
        assert!(matches!(
            outcome,
            UpdateOutcome::Conflict(Conflict::ModelBusy { active_job }) if active_job == a.id
        ));
        assert_eq!(
            store.get(b.id).await.unwrap().unwrap().status,
            JobStatus::Triggered
        );

        let outcome = store.update(other.id, Transition::start(Utc::now())).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = InMemoryJobStore::new();
        let result = store.update(Uuid::new_v4(), Transition::start(Utc::now())).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_status_and_history() {
        let store = InMemoryJobStore::new();
        let a = store.create(request("outage_model")).await.unwrap();
        let _b = store.create(request("outage_model")).await.unwrap();
        store.update(a.id, Transition::start(Utc::now())).await.unwrap();

        assert_eq!(store.find_by_status(JobStatus::Triggered).await.unwrap().len(), 1);
        assert_eq!(store.find_by_status(JobStatus::Training).await.unwrap()[0].id, a.id);
        assert_eq!(
            store.status_history(a.id),
            vec![JobStatus::Triggered, JobStatus::Training]
        );
    }
}
