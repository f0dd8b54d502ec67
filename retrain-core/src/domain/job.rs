//! Training job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::config::TrainingConfig;
use crate::domain::model::{Evaluation, ModelVersion};
use crate::dto::job::{CreateJob, Transition};

/// One retraining attempt
///
/// Created in `Triggered` by a scheduler or an external caller, then owned and
/// mutated only by the orchestrator through [`TrainingJob::apply`]. Records are
/// never deleted; they double as the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJob {
    pub id: Uuid,
    pub model_name: String,
    pub status: JobStatus,
    pub training_config: TrainingConfig,
    pub triggered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub evaluation: Option<Evaluation>,
    pub error: Option<String>,
    pub failure_stage: Option<FailureStage>,
    pub model_version: Option<ModelVersion>,
}

/// Job lifecycle status
///
/// `Triggered → Training → {Completed, Failed}`, or `Triggered → Rejected`
/// when another job already trains the same model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Triggered,
    Training,
    Completed,
    Failed,
    Rejected,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Triggered => "triggered",
            JobStatus::Training => "training",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triggered" => Ok(JobStatus::Triggered),
            "training" => Ok(JobStatus::Training),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "rejected" => Ok(JobStatus::Rejected),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Pipeline stage that was running when a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Dataset,
    Features,
    Training,
    Evaluation,
    Registry,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStage::Dataset => "dataset",
            FailureStage::Features => "features",
            FailureStage::Training => "training",
            FailureStage::Evaluation => "evaluation",
            FailureStage::Registry => "registry",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dataset" => Ok(FailureStage::Dataset),
            "features" => Ok(FailureStage::Features),
            "training" => Ok(FailureStage::Training),
            "evaluation" => Ok(FailureStage::Evaluation),
            "registry" => Ok(FailureStage::Registry),
            other => Err(format!("unknown failure stage '{}'", other)),
        }
    }
}

/// A transition that is not allowed from the job's current status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

impl TrainingJob {
    /// Builds a fresh `Triggered` record
    pub fn triggered(req: CreateJob, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_name: req.model_name,
            status: JobStatus::Triggered,
            training_config: req.training_config,
            triggered_at: at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            rejected_at: None,
            evaluation: None,
            error: None,
            failure_stage: None,
            model_version: None,
        }
    }

    /// Applies a transition in place
    ///
    /// Fails without touching the record unless the job is in the
    /// transition's source status. Timestamps earlier than the previous
    /// milestone are clamped up to it.
    pub fn apply(&mut self, transition: Transition) -> Result<(), InvalidTransition> {
        if self.status != transition.source() {
            return Err(InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: transition.target(),
            });
        }

        let floor = self.started_at.unwrap_or(self.triggered_at);

        match transition {
            Transition::Training { at } => {
                self.status = JobStatus::Training;
                self.started_at = Some(at.max(floor));
            }
            Transition::Completed {
                at,
                evaluation,
                model_version,
            } => {
                self.status = JobStatus::Completed;
                self.completed_at = Some(at.max(floor));
                self.evaluation = Some(evaluation);
                self.model_version = Some(model_version);
            }
            Transition::Failed { at, error, stage } => {
                self.status = JobStatus::Failed;
                self.failed_at = Some(at.max(floor));
                self.error = Some(error);
                self.failure_stage = stage;
            }
            Transition::Rejected { at, reason } => {
                self.status = JobStatus::Rejected;
                self.rejected_at = Some(at.max(floor));
                self.error = Some(reason);
            }
        }

        Ok(())
    }
}
