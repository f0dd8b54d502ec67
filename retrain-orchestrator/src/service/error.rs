//! Service error types

use retrain_core::capability::CapabilityError;
use retrain_core::domain::job::FailureStage;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::StoreError;

/// Why a retraining run could not produce a registered model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("dataset unavailable: {0}")]
    DataUnavailable(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("failed to persist model: {0}")]
    PersistenceFailure(String),

    #[error("model '{model_name}' is already being trained by job {active_job}")]
    ConcurrencyConflict { model_name: String, active_job: Uuid },

    #[error("job exceeded its {0:?} time limit")]
    Timeout(Duration),
}

impl From<CapabilityError> for PipelineError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::InsufficientData(msg) => PipelineError::InsufficientData(msg),
            other => PipelineError::TrainingFailure(other.to_string()),
        }
    }
}

/// A pipeline error tagged with the stage that raised it
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{stage} stage: {error}")]
pub struct StageError {
    pub stage: FailureStage,
    #[source]
    pub error: PipelineError,
}

impl StageError {
    pub fn new(stage: FailureStage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// Errors that prevent the orchestrator from recording an outcome at all
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
