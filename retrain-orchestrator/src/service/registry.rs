//! Model registry
//!
//! Issues version identifiers and persists trained models through an
//! `ArtifactStore`.

use chrono::Utc;
use retrain_core::domain::model::{Evaluation, ModelArtifact, ModelVersion, RegisteredModel};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::error::PipelineError;
use crate::repository::{ArtifactStore, StoreError};

/// Attempts at finding a free version when another writer got there first
const MAX_VERSION_ATTEMPTS: u32 = 3;

pub struct ModelRegistry {
    store: Arc<dyn ArtifactStore>,
    /// Last version issued per model. Held across the store write so that
    /// saves for one model are serialized.
    issued: Mutex<HashMap<String, ModelVersion>>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Persists a trained model under a fresh version
    ///
    /// The version is the registration time in epoch milliseconds, bumped past
    /// the last version known for the model. Nothing is kept if the write
    /// fails.
    pub async fn save(
        &self,
        artifact: ModelArtifact,
        evaluation: Evaluation,
        model_name: &str,
    ) -> Result<ModelVersion, PipelineError> {
        let mut issued = self.issued.lock().await;

        let mut previous = match issued.get(model_name) {
            Some(version) => Some(version.clone()),
            None => self.latest_version(model_name).await?,
        };

        let mut model = RegisteredModel {
            model_name: model_name.to_string(),
            version: ModelVersion::issue(Utc::now().timestamp_millis(), previous.as_ref()),
            artifact,
            evaluation,
            registered_at: Utc::now(),
        };

        for attempt in 1..=MAX_VERSION_ATTEMPTS {
            match self.store.put(&model).await {
                Ok(()) => {
                    info!(
                        "Registered model '{}' version {} (accuracy {:.4}, loss {:.4})",
                        model_name, model.version, evaluation.accuracy, evaluation.loss
                    );
                    issued.insert(model_name.to_string(), model.version.clone());
                    return Ok(model.version);
                }
                Err(StoreError::VersionExists { .. }) if attempt < MAX_VERSION_ATTEMPTS => {
                    warn!(
                        "Version {} of '{}' already exists, issuing the next one",
                        model.version, model_name
                    );
                    previous = Some(model.version.clone());
                    model.version =
                        ModelVersion::issue(Utc::now().timestamp_millis(), previous.as_ref());
                }
                Err(e) => return Err(PipelineError::PersistenceFailure(e.to_string())),
            }
        }

        Err(PipelineError::PersistenceFailure(format!(
            "no free version for model '{}' after {} attempts",
            model_name, MAX_VERSION_ATTEMPTS
        )))
    }

    pub async fn get(
        &self,
        model_name: &str,
        version: &ModelVersion,
    ) -> Result<Option<RegisteredModel>, PipelineError> {
        self.store
            .get(model_name, version)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(e.to_string()))
    }

    /// Most recently registered model, if any
    pub async fn latest(&self, model_name: &str) -> Result<Option<RegisteredModel>, PipelineError> {
        match self.latest_version(model_name).await? {
            Some(version) => self.get(model_name, &version).await,
            None => Ok(None),
        }
    }

    /// Stored versions, oldest first
    pub async fn versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, PipelineError> {
        self.store
            .versions(model_name)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(e.to_string()))
    }

    async fn latest_version(&self, model_name: &str) -> Result<Option<ModelVersion>, PipelineError> {
        Ok(self.versions(model_name).await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryArtifactStore;
    use retrain_core::domain::config::TrainingConfig;
    use retrain_core::domain::model::{Architecture, TrainingSummary};

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            architecture: Architecture::severity_classifier(),
            training_config: TrainingConfig::default(),
            summary: TrainingSummary {
                epochs_run: 3,
                stopped_early: false,
                final_train_loss: 1.0,
                best_validation_loss: Some(1.1),
            },
            payload: serde_json::json!({}),
        }
    }

    const EVALUATION: Evaluation = Evaluation {
        accuracy: 0.8,
        loss: 0.6,
    };

    #[tokio::test]
    async fn test_consecutive_saves_issue_increasing_versions() {
        let registry = ModelRegistry::new(Arc::new(InMemoryArtifactStore::new()));

        let first = registry.save(artifact(), EVALUATION, "outage_model").await.unwrap();
        let second = registry.save(artifact(), EVALUATION, "outage_model").await.unwrap();

        assert!(!first.as_str().is_empty());
        assert!(second > first);
        assert_eq!(registry.versions("outage_model").await.unwrap(), vec![first, second.clone()]);

        let latest = registry.latest("outage_model").await.unwrap().unwrap();
        assert_eq!(latest.version, second);
        assert_eq!(latest.evaluation, EVALUATION);
    }

    #[tokio::test]
    async fn test_new_registry_continues_after_stored_versions() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let far_future = ModelVersion::new((Utc::now().timestamp_millis() + 1_000_000).to_string());
        store
            .put(&RegisteredModel {
                model_name: "outage_model".to_string(),
                version: far_future.clone(),
                artifact: artifact(),
                evaluation: EVALUATION,
                registered_at: Utc::now(),
            })
            .await
            .unwrap();

        let registry = ModelRegistry::new(store);
        let version = registry.save(artifact(), EVALUATION, "outage_model").await.unwrap();
        assert!(version > far_future);
    }

    #[tokio::test]
    async fn test_invalid_model_name_is_a_persistence_failure() {
        let registry = ModelRegistry::new(Arc::new(InMemoryArtifactStore::new()));
        let err = registry.save(artifact(), EVALUATION, "bad/name").await.unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailure(_)));
    }

    #[tokio::test]
    async fn test_unknown_model_has_no_latest() {
        let registry = ModelRegistry::new(Arc::new(InMemoryArtifactStore::new()));
        assert!(registry.latest("outage_model").await.unwrap().is_none());
    }
}
