//! Dataset provider
//!
//! Source of the most recent outage report snapshot. Collecting the reports is
//! someone else's job; this layer only reads what was published.

use async_trait::async_trait;
use retrain_core::domain::report::DatasetSnapshot;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::error::StoreError;

/// File name of the published snapshot inside the data directory
pub const DATASET_FILE: &str = "latest_dataset.json";

#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Returns the latest snapshot, or `None` when nothing was ever published
    async fn latest_dataset(&self) -> Result<Option<DatasetSnapshot>, StoreError>;
}

/// Reads `<data_dir>/latest_dataset.json`
pub struct FsDatasetProvider {
    path: PathBuf,
}

impl FsDatasetProvider {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(DATASET_FILE),
        }
    }
}

#[async_trait]
impl DatasetProvider for FsDatasetProvider {
    async fn latest_dataset(&self) -> Result<Option<DatasetSnapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No dataset published at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: DatasetSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            "Loaded dataset with {} reports from {}",
            snapshot.reports.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }
}

/// Holds a snapshot in memory; `publish` replaces it
#[derive(Default)]
pub struct InMemoryDatasetProvider {
    snapshot: Mutex<Option<DatasetSnapshot>>,
}

impl InMemoryDatasetProvider {
    pub fn new(snapshot: Option<DatasetSnapshot>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn publish(&self, snapshot: DatasetSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDatasetProvider {
    async fn latest_dataset(&self) -> Result<Option<DatasetSnapshot>, StoreError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("retrain-dataset-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_missing_file_is_no_dataset() {
        let provider = FsDatasetProvider::new(temp_dir("missing"));
        assert!(provider.latest_dataset().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_published_snapshot() {
        let dir = temp_dir("published");
        std::fs::write(
            dir.join(DATASET_FILE),
            r#"{"reports": [
                {"timestamp": "2024-03-15T14:30:00Z", "duration": 4, "severity": "high"},
                {"timestamp": 1710513000000, "severity": "low"}
            ]}"#,
        )
        .unwrap();

        let snapshot = FsDatasetProvider::new(&dir)
            .latest_dataset()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.reports.len(), 2);
        assert_eq!(snapshot.reports[0].duration, Some(4.0));
        assert_eq!(snapshot.reports[1].duration, None);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_an_error() {
        let dir = temp_dir("malformed");
        std::fs::write(dir.join(DATASET_FILE), "not json").unwrap();
        let result = FsDatasetProvider::new(&dir).latest_dataset().await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_in_memory_publish() {
        let provider = InMemoryDatasetProvider::default();
        assert!(provider.latest_dataset().await.unwrap().is_none());

        provider.publish(DatasetSnapshot::default());
        assert!(provider.latest_dataset().await.unwrap().is_some());
    }
}
