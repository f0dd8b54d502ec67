//! Schedule configuration source

use async_trait::async_trait;
use retrain_core::domain::schedule::ScheduleConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::error::StoreError;

/// File name of the schedule document inside the data directory
pub const SCHEDULE_FILE: &str = "retraining_schedule.json";

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Schedule for `model_name`, or `None` when no record exists
    async fn schedule_config(&self, model_name: &str) -> Result<Option<ScheduleConfig>, StoreError>;
}

/// Shapes accepted in `retraining_schedule.json`
///
/// `PerModel` is tried first: every field of a shared record has a default,
/// so a keyed document would otherwise parse as an empty shared record.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScheduleDocument {
    /// Records keyed by model name
    PerModel(HashMap<String, ScheduleConfig>),
    /// One record applying to every model
    Shared(ScheduleConfig),
}

/// Reads `<data_dir>/retraining_schedule.json` on every call
///
/// Edits to the file take effect at the next scheduler tick without a restart.
pub struct FsScheduleSource {
    path: PathBuf,
}

impl FsScheduleSource {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SCHEDULE_FILE),
        }
    }
}

#[async_trait]
impl ScheduleSource for FsScheduleSource {
    async fn schedule_config(&self, model_name: &str) -> Result<Option<ScheduleConfig>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(match serde_json::from_slice(&bytes)? {
            ScheduleDocument::PerModel(mut configs) => configs.remove(model_name),
            ScheduleDocument::Shared(config) => Some(config),
        })
    }
}

#[derive(Default)]
pub struct InMemoryScheduleSource {
    configs: Mutex<HashMap<String, ScheduleConfig>>,
}

impl InMemoryScheduleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, model_name: impl Into<String>, config: ScheduleConfig) {
        self.configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_name.into(), config);
    }
}

#[async_trait]
impl ScheduleSource for InMemoryScheduleSource {
    async fn schedule_config(&self, model_name: &str) -> Result<Option<ScheduleConfig>, StoreError> {
        Ok(self
            .configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("retrain-schedule-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_file_is_absent_schedule() {
        let source = FsScheduleSource::new(temp_dir("missing"));
        assert!(source.schedule_config("outage_model").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_record() {
        let dir = temp_dir("shared");
        std::fs::write(dir.join(SCHEDULE_FILE), r#"{"enabled": false}"#).unwrap();

        let config = FsScheduleSource::new(&dir)
            .schedule_config("outage_model")
            .await
            .unwrap()
            .unwrap();
        assert!(!config.enabled);
        assert!(config.cadence.is_none());
    }

    #[tokio::test]
    async fn test_per_model_records() {
        let dir = temp_dir("per-model");
        std::fs::write(
            dir.join(SCHEDULE_FILE),
            r#"{
                "outage_model": {"enabled": true, "cadence": {"weekday": "Mon", "hour": 3, "minute": 30}},
                "other_model": {"enabled": false}
            }"#,
        )
        .unwrap();
        let source = FsScheduleSource::new(&dir);

        let config = source.schedule_config("outage_model").await.unwrap().unwrap();
        assert!(config.enabled);
        assert_eq!(config.cadence.unwrap().weekday, Weekday::Mon);

        assert!(source.schedule_config("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryScheduleSource::new();
        assert!(source.schedule_config("outage_model").await.unwrap().is_none());

        source.set(
            "outage_model",
            ScheduleConfig {
                enabled: true,
                cadence: None,
            },
        );
        assert!(source.schedule_config("outage_model").await.unwrap().unwrap().enabled);
    }
}
