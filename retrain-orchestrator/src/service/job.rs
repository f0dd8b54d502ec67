//! Job orchestrator
//!
//! The job state machine. Reacts to creation notifications, claims the
//! per-model training slot, runs the pipeline and records the outcome:
//!
//! ```text
//! triggered ──claim──▶ training ──▶ completed
//!     │                    └──────▶ failed
//!     └──slot taken──▶ rejected
//! ```
//!
//! Handling is idempotent: a notification for a job that is no longer
//! `triggered` is ignored, so replays and sweeps are harmless.

use chrono::{TimeDelta, Utc};
use retrain_core::domain::job::{FailureStage, JobStatus, TrainingJob};
use retrain_core::domain::model::{Evaluation, ModelVersion};
use retrain_core::dto::job::{Conflict, JobCreated, Transition, UpdateOutcome};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{OrchestratorError, PipelineError};
use super::pipeline::TrainingPipeline;
use crate::repository::JobStore;

/// Default wall-clock ceiling for one job
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Default interval between sweeps for missed notifications
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Attempts at writing a terminal status before giving up
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_DELAY_MS: u64 = 200;

/// What one handling of a job did
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job was not `triggered`; nothing was written
    Ignored(JobStatus),
    /// Another job holds the model's training slot
    Rejected { active_job: Uuid },
    Completed {
        model_version: ModelVersion,
        evaluation: Evaluation,
    },
    Failed {
        stage: Option<FailureStage>,
        error: String,
    },
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    pipeline: Arc<TrainingPipeline>,
    job_timeout: Duration,
    sweep_interval: Duration,
    /// Jobs this process is currently running
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Removes a job from the in-flight set when handling ends, however it ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    job_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<TrainingPipeline>) -> Self {
        Self {
            store,
            pipeline,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Drives one job from `triggered` to a terminal status
    ///
    /// Returns an error only when the store itself fails; pipeline failures
    /// are recorded on the job and reported as [`JobOutcome::Failed`].
    pub async fn handle_created(&self, job_id: Uuid) -> Result<JobOutcome, OrchestratorError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if job.status != JobStatus::Triggered {
            debug!("Ignoring job {} in status {}", job_id, job.status);
            return Ok(JobOutcome::Ignored(job.status));
        }

        let job = match self.store.update(job_id, Transition::start(Utc::now())).await? {
            UpdateOutcome::Applied(job) => job,
            UpdateOutcome::Conflict(Conflict::StatusChanged { current }) => {
                debug!("Job {} was claimed elsewhere (now {})", job_id, current);
                return Ok(JobOutcome::Ignored(current));
            }
            UpdateOutcome::Conflict(Conflict::ModelBusy { active_job }) => {
                return self.reject(&job, active_job).await;
            }
        };

        let _guard = self.track(job_id);
        info!(
            "Job {} started training model '{}' (epochs {}, batch size {})",
            job.id, job.model_name, job.training_config.epochs, job.training_config.batch_size
        );

        let (transition, outcome) = self.run_pipeline(&job).await;
        self.finish(job_id, transition).await?;
        Ok(outcome)
    }

    /// Runs the pipeline under the job's time limit
    ///
    /// The limit covers the dataset, fit and evaluation stages. The registry
    /// commit is not cancellable, so it runs to completion outside the limit
    /// and the job records whatever it actually produced.
    async fn run_pipeline(&self, job: &TrainingJob) -> (Transition, JobOutcome) {
        let stop = Arc::new(AtomicBool::new(false));
        let trained = tokio::time::timeout(self.job_timeout, self.pipeline.train(job, Arc::clone(&stop))).await;

        let trained = match trained {
            Ok(Ok(trained)) => trained,
            Ok(Err(failure)) => return failed(job, Some(failure.stage), failure.error.to_string()),
            Err(_) => {
                // The fit may still be running on a blocking thread
                stop.store(true, Ordering::Relaxed);
                return failed(job, None, PipelineError::Timeout(self.job_timeout).to_string());
            }
        };

        match self.pipeline.register(job, trained).await {
            Ok(run) => {
                info!(
                    "Job {} completed: model '{}' version {}",
                    job.id, job.model_name, run.model_version
                );
                (
                    Transition::Completed {
                        at: Utc::now(),
                        evaluation: run.evaluation,
                        model_version: run.model_version.clone(),
                    },
                    JobOutcome::Completed {
                        model_version: run.model_version,
                        evaluation: run.evaluation,
                    },
                )
            }
            Err(failure) => failed(job, Some(failure.stage), failure.error.to_string()),
        }
    }

    async fn reject(&self, job: &TrainingJob, active_job: Uuid) -> Result<JobOutcome, OrchestratorError> {
        let reason = PipelineError::ConcurrencyConflict {
            model_name: job.model_name.clone(),
            active_job,
        }
        .to_string();
        warn!("Rejecting job {}: {}", job.id, reason);

        let transition = Transition::Rejected {
            at: Utc::now(),
            reason,
        };
        match self.store.update(job.id, transition).await? {
            UpdateOutcome::Applied(_) => Ok(JobOutcome::Rejected { active_job }),
            UpdateOutcome::Conflict(conflict) => {
                debug!("Job {} changed before it could be rejected: {:?}", job.id, conflict);
                let current = self
                    .store
                    .get(job.id)
                    .await?
                    .map(|job| job.status)
                    .unwrap_or(job.status);
                Ok(JobOutcome::Ignored(current))
            }
        }
    }

    /// Writes a terminal transition, retrying transient store errors
    async fn finish(&self, job_id: Uuid, transition: Transition) -> Result<(), OrchestratorError> {
        let mut attempt = 0;
        let mut delay_ms = RETRY_INITIAL_DELAY_MS;

        loop {
            attempt += 1;

            match self.store.update(job_id, transition.clone()).await {
                Ok(UpdateOutcome::Applied(job)) => {
                    if attempt > 1 {
                        info!("Recorded job {} as {} after {} attempt(s)", job_id, job.status, attempt);
                    }
                    return Ok(());
                }
                Ok(UpdateOutcome::Conflict(conflict)) => {
                    warn!(
                        "Job {} already left training before its outcome was recorded: {:?}",
                        job_id, conflict
                    );
                    return Ok(());
                }
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    warn!(
                        "Failed to record outcome of job {} (attempt {}/{}): {}. Retrying in {}ms",
                        job_id, attempt, TERMINAL_WRITE_ATTEMPTS, e, delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                }
                Err(e) => {
                    error!(
                        "Giving up on recording outcome of job {}; it stays in training: {}",
                        job_id, e
                    );
                    return Err(e.into());
                }
            }
        }
    }

    fn track(&self, job_id: Uuid) -> InFlight<'_> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id);
        InFlight {
            set: &self.in_flight,
            job_id,
        }
    }

    fn is_in_flight(&self, job_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }

    /// Fails `training` jobs that outlived the job timeout without a result
    ///
    /// Such jobs were left behind by a process that stopped mid-run; while
    /// they stay in `training` they hold their model's slot.
    pub async fn reap_expired(&self) -> Result<usize, OrchestratorError> {
        let limit = TimeDelta::from_std(self.job_timeout).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let mut reaped = 0;

        for job in self.store.find_by_status(JobStatus::Training).await? {
            let started = job.started_at.unwrap_or(job.triggered_at);
            let expired = started.checked_add_signed(limit).is_some_and(|deadline| deadline < now);
            if !expired || self.is_in_flight(job.id) {
                continue;
            }

            let transition = Transition::Failed {
                at: now,
                error: format!(
                    "abandoned: {}",
                    PipelineError::Timeout(self.job_timeout)
                ),
                stage: None,
            };
            if let UpdateOutcome::Applied(_) = self.store.update(job.id, transition).await? {
                warn!("Job {} exceeded its time limit without a result; marked failed", job.id);
                reaped += 1;
            }
        }

        Ok(reaped)
    }

    /// Dispatches every `triggered` job, oldest first
    pub async fn sweep(self: &Arc<Self>) -> Result<usize, OrchestratorError> {
        self.reap_expired().await?;

        let pending = self.store.find_by_status(JobStatus::Triggered).await?;
        if !pending.is_empty() {
            info!("Sweep found {} triggered job(s)", pending.len());
        }
        for job in &pending {
            self.dispatch(job.id);
        }
        Ok(pending.len())
    }

    async fn sweep_logged(self: &Arc<Self>) {
        if let Err(e) = self.sweep().await {
            error!("Job sweep failed: {}", e);
        }
    }

    /// Handles a job on its own task
    pub fn dispatch(self: &Arc<Self>, job_id: Uuid) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.handle_created(job_id).await {
                Ok(outcome) => debug!("Job {} handled: {:?}", job_id, outcome),
                Err(e) => error!("Failed to handle job {}: {}", job_id, e),
            }
        });
    }

    /// Reacts to job notifications until the store closes its channel
    ///
    /// Subscribes before the first sweep so a job created in between is not
    /// missed. A lagging receiver and the periodic tick both trigger a sweep.
    pub async fn run(self: Arc<Self>) -> Result<(), OrchestratorError> {
        let mut events = self.store.subscribe();
        self.sweep().await?;

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!("Orchestrator listening for training jobs");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(JobCreated { job_id }) => self.dispatch(job_id),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} job notification(s), sweeping", skipped);
                        self.sweep_logged().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Job notification channel closed");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => self.sweep_logged().await,
            }
        }
    }
}

fn failed(job: &TrainingJob, stage: Option<FailureStage>, message: String) -> (Transition, JobOutcome) {
    match stage {
        Some(stage) => error!("Job {} failed in {} stage: {}", job.id, stage, message),
        None => error!("Job {} failed: {}", job.id, message),
    }
    (
        Transition::Failed {
            at: Utc::now(),
            error: message.clone(),
            stage,
        },
        JobOutcome::Failed { stage, error: message },
    )
}
