//! Training pipeline
//!
//! Dataset → features → fit → evaluate → register, for one claimed job. The
//! pipeline never touches the job record; the orchestrator turns its result
//! into a status transition.

use retrain_core::capability::{Evaluator, Trainer};
use retrain_core::domain::job::{FailureStage, TrainingJob};
use retrain_core::domain::model::{Evaluation, ModelArtifact, ModelVersion};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

use super::error::{PipelineError, StageError};
use super::features;
use super::registry::ModelRegistry;
use crate::repository::DatasetProvider;

/// Which examples the evaluator scores
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum EvaluationMode {
    /// Score on the same examples the model was fit on
    ///
    /// Overstates accuracy; kept as the default so reported metrics stay
    /// comparable with earlier models.
    #[default]
    TrainingSet,
    /// Hold out the trailing `fraction` of examples from training and score on them
    HeldOut { fraction: f64 },
}

impl FromStr for EvaluationMode {
    type Err = String;

    /// Parses `training-set` or `held-out:<fraction>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "training-set" {
            return Ok(EvaluationMode::TrainingSet);
        }

        let Some(fraction) = s.strip_prefix("held-out:") else {
            return Err(format!(
                "unknown evaluation mode '{}', expected 'training-set' or 'held-out:<fraction>'",
                s
            ));
        };
        let fraction: f64 = fraction
            .parse()
            .map_err(|_| format!("invalid held-out fraction '{}'", fraction))?;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(format!("held-out fraction {} must be in (0, 1)", fraction));
        }
        Ok(EvaluationMode::HeldOut { fraction })
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMode::TrainingSet => f.write_str("training-set"),
            EvaluationMode::HeldOut { fraction } => write!(f, "held-out:{}", fraction),
        }
    }
}

/// A fitted and scored model that has not been registered yet
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub evaluation: Evaluation,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub model_version: ModelVersion,
    pub evaluation: Evaluation,
}

pub struct TrainingPipeline {
    dataset: Arc<dyn DatasetProvider>,
    trainer: Arc<dyn Trainer>,
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<ModelRegistry>,
    evaluation_mode: EvaluationMode,
}

impl TrainingPipeline {
    pub fn new(
        dataset: Arc<dyn DatasetProvider>,
        trainer: Arc<dyn Trainer>,
        evaluator: Arc<dyn Evaluator>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            dataset,
            trainer,
            evaluator,
            registry,
            evaluation_mode: EvaluationMode::default(),
        }
    }

    pub fn with_evaluation_mode(mut self, mode: EvaluationMode) -> Self {
        self.evaluation_mode = mode;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Runs every stage for `job`
    pub async fn run(&self, job: &TrainingJob, stop: Arc<AtomicBool>) -> Result<PipelineRun, StageError> {
        let trained = self.train(job, stop).await?;
        self.register(job, trained).await
    }

    /// Dataset, feature, fit and evaluation stages
    ///
    /// Nothing is persisted, so the returned future may be dropped at any
    /// point. `stop` is handed to the trainer; raising it ends the fit at the
    /// next epoch boundary.
    pub async fn train(&self, job: &TrainingJob, stop: Arc<AtomicBool>) -> Result<TrainedModel, StageError> {
        let snapshot = self
            .dataset
            .latest_dataset()
            .await
            .map_err(|e| StageError::new(FailureStage::Dataset, PipelineError::DataUnavailable(e.to_string())))?
            .ok_or_else(|| {
                StageError::new(
                    FailureStage::Dataset,
                    PipelineError::DataUnavailable("no dataset snapshot has been published".to_string()),
                )
            })?;

        let all = features::extract(&snapshot.reports);
        let (train, test) = match self.evaluation_mode {
            EvaluationMode::TrainingSet => {
                let all = Arc::new(all);
                (Arc::clone(&all), all)
            }
            EvaluationMode::HeldOut { fraction } => {
                let (head, tail) = all.split_tail(fraction);
                (Arc::new(head), Arc::new(tail))
            }
        };
        debug!(
            "Job {}: {} reports, {} training examples, {} evaluation examples",
            job.id,
            snapshot.reports.len(),
            train.len(),
            test.len()
        );

        let artifact = {
            let trainer = Arc::clone(&self.trainer);
            let config = job.training_config;
            tokio::task::spawn_blocking(move || trainer.fit(&train, &config, &stop))
                .await
                .map_err(|e| {
                    StageError::new(
                        FailureStage::Training,
                        PipelineError::TrainingFailure(format!("training task failed: {}", e)),
                    )
                })?
                .map_err(|e| StageError::new(FailureStage::Training, e))?
        };
        info!(
            "Job {}: fit finished after {} epoch(s){}",
            job.id,
            artifact.summary.epochs_run,
            if artifact.summary.stopped_early { " (early stop)" } else { "" }
        );

        let (artifact, evaluation) = {
            let evaluator = Arc::clone(&self.evaluator);
            tokio::task::spawn_blocking(move || {
                let evaluation = evaluator.evaluate(&artifact, &test);
                (artifact, evaluation)
            })
            .await
            .map_err(|e| {
                StageError::new(
                    FailureStage::Evaluation,
                    PipelineError::TrainingFailure(format!("evaluation task failed: {}", e)),
                )
            })?
        };
        let evaluation = evaluation.map_err(|e| StageError::new(FailureStage::Evaluation, e))?;
        evaluation.validate().map_err(|e| {
            StageError::new(
                FailureStage::Evaluation,
                PipelineError::TrainingFailure(format!("evaluator returned invalid metrics: {}", e)),
            )
        })?;

        Ok(TrainedModel { artifact, evaluation })
    }

    /// Registry stage: commits the artifact under a new version
    ///
    /// Must run to completion once started; a dropped commit can still land.
    pub async fn register(&self, job: &TrainingJob, trained: TrainedModel) -> Result<PipelineRun, StageError> {
        let TrainedModel { artifact, evaluation } = trained;
        let model_version = self
            .registry
            .save(artifact, evaluation, &job.model_name)
            .await
            .map_err(|e| StageError::new(FailureStage::Registry, e))?;

        Ok(PipelineRun {
            model_version,
            evaluation,
        })
    }
}
