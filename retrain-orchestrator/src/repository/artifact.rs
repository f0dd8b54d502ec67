//! Artifact store
//!
//! Durable home of registered models. Versions are write-once: a `put` for an
//! existing `(model, version)` pair fails instead of replacing it.

use async_trait::async_trait;
use retrain_core::domain::model::{ModelVersion, RegisteredModel};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{StoreError, validate_key};

const ARTIFACT_EXT: &str = "json";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persists a new version, failing with `VersionExists` rather than overwriting
    async fn put(&self, model: &RegisteredModel) -> Result<(), StoreError>;

    async fn get(
        &self,
        model_name: &str,
        version: &ModelVersion,
    ) -> Result<Option<RegisteredModel>, StoreError>;

    /// All stored versions of `model_name`, oldest first
    async fn versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, StoreError>;
}

/// One JSON file per version under `<root>/<model_name>/<version>.json`
///
/// A version is written to a hidden temp file, synced, then hard-linked into
/// place. The link fails if the target exists, so a published file is never
/// replaced and never seen half-written.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn model_dir(&self, model_name: &str) -> Result<PathBuf, StoreError> {
        validate_key(model_name)?;
        Ok(self.root.join(model_name))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, model: &RegisteredModel) -> Result<(), StoreError> {
        let dir = self.model_dir(&model.model_name)?;
        let version = model.version.as_str();
        validate_key(version)?;

        tokio::fs::create_dir_all(&dir).await?;
        let final_path = dir.join(format!("{}.{}", version, ARTIFACT_EXT));
        let tmp_path = dir.join(format!(".{}.{}.tmp", version, ARTIFACT_EXT));

        let bytes = serde_json::to_vec_pretty(model)?;
        let written = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;

        let linked = match written {
            Ok(()) => tokio::fs::hard_link(&tmp_path, &final_path).await,
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&tmp_path).await;

        match linked {
            Ok(()) => {
                debug!("Stored {} version {} at {}", model.model_name, version, final_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::VersionExists {
                model_name: model.model_name.clone(),
                version: version.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        model_name: &str,
        version: &ModelVersion,
    ) -> Result<Option<RegisteredModel>, StoreError> {
        validate_key(version.as_str())?;
        let path = self
            .model_dir(model_name)?
            .join(format!("{}.{}", version, ARTIFACT_EXT));

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, StoreError> {
        let dir = self.model_dir(model_name)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    versions.push(ModelVersion::new(stem));
                }
            }
        }

        versions.sort();
        Ok(versions)
    }
}

/// Keeps registered models in a map
#[derive(Default)]
pub struct InMemoryArtifactStore {
    models: Mutex<HashMap<(String, ModelVersion), RegisteredModel>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions across all models
    pub fn len(&self) -> usize {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, model: &RegisteredModel) -> Result<(), StoreError> {
        validate_key(&model.model_name)?;
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);

        let key = (model.model_name.clone(), model.version.clone());
        if models.contains_key(&key) {
            return Err(StoreError::VersionExists {
                model_name: model.model_name.clone(),
                version: model.version.to_string(),
            });
        }
        models.insert(key, model.clone());
        Ok(())
    }

    async fn get(
        &self,
        model_name: &str,
        version: &ModelVersion,
    ) -> Result<Option<RegisteredModel>, StoreError> {
        Ok(self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(model_name.to_string(), version.clone()))
            .cloned())
    }

    async fn versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, StoreError> {
        let mut versions: Vec<ModelVersion> = self
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(name, _)| name == model_name)
            .map(|(_, version)| version.clone())
            .collect();
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use retrain_core::domain::config::TrainingConfig;
    use retrain_core::domain::model::{Architecture, Evaluation, ModelArtifact, TrainingSummary};

    fn registered(model_name: &str, version: &str) -> RegisteredModel {
        RegisteredModel {
            model_name: model_name.to_string(),
            version: ModelVersion::new(version),
            artifact: ModelArtifact {
                architecture: Architecture::severity_classifier(),
                training_config: TrainingConfig::default(),
                summary: TrainingSummary {
                    epochs_run: 1,
                    stopped_early: false,
                    final_train_loss: 1.2,
                    best_validation_loss: None,
                },
                payload: serde_json::json!({"weights": []}),
            },
            evaluation: Evaluation {
                accuracy: 0.5,
                loss: 1.1,
            },
            registered_at: Utc::now(),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("retrain-artifacts-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_fs_put_then_get() {
        let store = FsArtifactStore::new(temp_dir("roundtrip"));
        let model = registered("outage_model", "1000");
        store.put(&model).await.unwrap();

        let loaded = store
            .get("outage_model", &ModelVersion::new("1000"))
            .await
            .unwrap();
        assert_eq!(loaded, Some(model));
        assert!(store
            .get("outage_model", &ModelVersion::new("2000"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_fs_versions_are_write_once() {
        let root = temp_dir("write-once");
        let store = FsArtifactStore::new(&root);
        store.put(&registered("outage_model", "1000")).await.unwrap();

        let err = store.put(&registered("outage_model", "1000")).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionExists { .. }));

        // No temp file left behind
        let names: Vec<_> = std::fs::read_dir(root.join("outage_model"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_fs_versions_sorted_numerically() {
        let store = FsArtifactStore::new(temp_dir("sorted"));
        for version in ["1001", "999", "1000"] {
            store.put(&registered("outage_model", version)).await.unwrap();
        }
        store.put(&registered("other_model", "5")).await.unwrap();

        let versions = store.versions("outage_model").await.unwrap();
        let versions: Vec<&str> = versions.iter().map(ModelVersion::as_str).collect();
        assert_eq!(versions, vec!["999", "1000", "1001"]);
        assert!(store.versions("never_trained").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_rejects_path_like_names() {
        let store = FsArtifactStore::new(temp_dir("keys"));
        let err = store.put(&registered("../escape", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryArtifactStore::new();
        store.put(&registered("outage_model", "7")).await.unwrap();
        assert!(matches!(
            store.put(&registered("outage_model", "7")).await,
            Err(StoreError::VersionExists { .. })
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.versions("outage_model").await.unwrap().len(), 1);
    }
}
