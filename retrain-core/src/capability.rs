//! Numerical backend seams
//!
//! The orchestrator only ever sees these two traits, so the backend that fits
//! and scores models can be swapped without touching the job state machine.
//! Both are synchronous: fitting is CPU-bound and callers move it onto a
//! blocking thread.

use std::sync::atomic::AtomicBool;
use thiserror::Error;

use crate::domain::config::TrainingConfig;
use crate::domain::features::FeatureSet;
use crate::domain::model::{Evaluation, ModelArtifact};

/// Errors reported by a training backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// Not enough examples to fit or score anything
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Training configuration outside the backend's accepted ranges
    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    /// Artifact payload this backend cannot read
    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    /// Loss became NaN or infinite
    #[error("training diverged at epoch {epoch} (loss {loss})")]
    Diverged { epoch: u32, loss: f64 },

    /// The caller raised the stop flag
    #[error("training stopped after {epochs_run} epoch(s)")]
    Stopped { epochs_run: u32 },
}

/// Fits a classifier
pub trait Trainer: Send + Sync {
    /// Trains a new model on `data`
    ///
    /// `stop` is polled between epochs; once it reads `true` the fit ends with
    /// [`CapabilityError::Stopped`].
    fn fit(
        &self,
        data: &FeatureSet,
        config: &TrainingConfig,
        stop: &AtomicBool,
    ) -> Result<ModelArtifact, CapabilityError>;
}

/// Scores a fitted model
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        artifact: &ModelArtifact,
        data: &FeatureSet,
    ) -> Result<Evaluation, CapabilityError>;
}
