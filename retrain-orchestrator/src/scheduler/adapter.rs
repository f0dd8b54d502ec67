//! Scheduler adapter
//!
//! Wakes up on the configured weekly cadence, asks the schedule source whether
//! retraining is enabled for the model and, if so, creates a `triggered` job.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use retrain_core::domain::config::TrainingConfig;
use retrain_core::domain::job::TrainingJob;
use retrain_core::domain::schedule::Cadence;
use retrain_core::dto::job::CreateJob;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::repository::{JobStore, ScheduleSource};

/// Longest single sleep, so cadence edits are picked up without a restart
const MAX_SLEEP: Duration = Duration::from_secs(60 * 60);

pub struct SchedulerAdapter {
    schedules: Arc<dyn ScheduleSource>,
    store: Arc<dyn JobStore>,
    model_name: String,
    default_cadence: Cadence,
}

impl SchedulerAdapter {
    pub fn new(
        schedules: Arc<dyn ScheduleSource>,
        store: Arc<dyn JobStore>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            schedules,
            store,
            model_name: model_name.into(),
            default_cadence: Cadence::default(),
        }
    }

    /// Cadence used when the schedule record does not set one
    pub fn with_default_cadence(mut self, cadence: Cadence) -> Self {
        self.default_cadence = cadence;
        self
    }

    /// Creates a job if retraining is enabled for the model
    ///
    /// An absent or disabled schedule is not an error; it yields `None`.
    pub async fn check_and_trigger(&self) -> Result<Option<TrainingJob>> {
        let config = self
            .schedules
            .schedule_config(&self.model_name)
            .await
            .with_context(|| format!("Failed to read schedule for '{}'", self.model_name))?;

        match config {
            Some(config) if config.enabled => {
                let job = self
                    .store
                    .create(CreateJob::new(&self.model_name, TrainingConfig::default()))
                    .await
                    .context("Failed to create scheduled training job")?;
                info!("Scheduled retraining job {} for '{}'", job.id, self.model_name);
                Ok(Some(job))
            }
            Some(_) => {
                info!("Retraining is disabled for '{}', skipping", self.model_name);
                Ok(None)
            }
            None => {
                info!("No retraining schedule for '{}', skipping", self.model_name);
                Ok(None)
            }
        }
    }

    /// Cadence in effect right now
    async fn current_cadence(&self) -> Cadence {
        match self.schedules.schedule_config(&self.model_name).await {
            Ok(Some(config)) => config.cadence.unwrap_or(self.default_cadence),
            Ok(None) => self.default_cadence,
            Err(e) => {
                warn!("Failed to read schedule, using default cadence: {}", e);
                self.default_cadence
            }
        }
    }

    /// Checks once per cadence slot, forever
    ///
    /// A slot is the first cadence time after the previous check; slots missed
    /// while the process was down are not replayed.
    pub async fn run(&self) -> Result<()> {
        let mut last_check = Utc::now();
        info!(
            "Scheduler started for '{}' (default cadence {})",
            self.model_name, self.default_cadence
        );

        loop {
            let cadence = self.current_cadence().await;
            let now = Utc::now();

            if is_due(&cadence, last_check, now) {
                last_check = now;
                if let Err(e) = self.check_and_trigger().await {
                    error!("Scheduled check failed: {:#}", e);
                }
                continue;
            }

            let next = cadence.next_after(last_check);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO).min(MAX_SLEEP);
            debug!("Next retraining check at {} (sleeping {:?})", next, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Whether a cadence slot has passed since `last_check`
pub fn is_due(cadence: &Cadence, last_check: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    cadence.next_after(last_check) <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryJobStore, InMemoryScheduleSource};
    use chrono::{TimeZone, Weekday};
    use retrain_core::domain::job::JobStatus;
    use retrain_core::domain::schedule::ScheduleConfig;

    fn adapter(schedules: Arc<InMemoryScheduleSource>, store: Arc<InMemoryJobStore>) -> SchedulerAdapter {
        SchedulerAdapter::new(schedules, store, "outage_model")
    }

    #[tokio::test]
    async fn test_disabled_schedule_creates_no_job() {
        let schedules = Arc::new(InMemoryScheduleSource::new());
        schedules.set(
            "outage_model",
            ScheduleConfig {
                enabled: false,
                cadence: None,
            },
        );
        let store = Arc::new(InMemoryJobStore::new());

        let created = adapter(schedules, store.clone()).check_and_trigger().await.unwrap();
        assert!(created.is_none());
        assert!(store.find_by_status(JobStatus::Triggered).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absent_schedule_creates_no_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let created = adapter(Arc::new(InMemoryScheduleSource::new()), store.clone())
            .check_and_trigger()
            .await
            .unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_enabled_schedule_creates_triggered_job_with_defaults() {
        let schedules = Arc::new(InMemoryScheduleSource::new());
        schedules.set(
            "outage_model",
            ScheduleConfig {
                enabled: true,
                cadence: None,
            },
        );
        let store = Arc::new(InMemoryJobStore::new());
        let mut events = store.subscribe();

        let job = adapter(schedules, store.clone())
            .check_and_trigger()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.status, JobStatus::Triggered);
        assert_eq!(job.model_name, "outage_model");
        assert_eq!(job.training_config, TrainingConfig::default());
        assert_eq!(events.recv().await.unwrap().job_id, job.id);
    }

    #[test]
    fn test_is_due_once_per_slot() {
        let sunday_two = Cadence::default();
        // Saturday evening
        let last_check = Utc.with_ymd_and_hms(2024, 3, 16, 20, 0, 0).unwrap();

        let before = Utc.with_ymd_and_hms(2024, 3, 17, 1, 59, 0).unwrap();
        assert!(!is_due(&sunday_two, last_check, before));

        let at = Utc.with_ymd_and_hms(2024, 3, 17, 2, 0, 0).unwrap();
        assert!(is_due(&sunday_two, last_check, at));

        // Checked at 02:00; the next slot is a week away
        let later = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        assert!(!is_due(&sunday_two, at, later));
    }

    #[tokio::test]
    async fn test_record_cadence_overrides_default() {
        let schedules = Arc::new(InMemoryScheduleSource::new());
        let monday = Cadence::weekly(Weekday::Mon, 6, 30).unwrap();
        schedules.set(
            "outage_model",
            ScheduleConfig {
                enabled: true,
                cadence: Some(monday),
            },
        );
        let adapter = adapter(schedules, Arc::new(InMemoryJobStore::new()));
        assert_eq!(adapter.current_cadence().await, monday);

        let fallback = SchedulerAdapter::new(
            Arc::new(InMemoryScheduleSource::new()),
            Arc::new(InMemoryJobStore::new()),
            "outage_model",
        )
        .with_default_cadence(monday);
        assert_eq!(fallback.current_cadence().await, monday);
    }
}
