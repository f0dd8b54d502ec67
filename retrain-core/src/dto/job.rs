//! Job DTOs exchanged with job store implementations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::config::TrainingConfig;
use crate::domain::job::{FailureStage, JobStatus, TrainingJob};
use crate::domain::model::{Evaluation, ModelVersion};

/// Request to create/trigger a new training job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJob {
    pub model_name: String,
    #[serde(default)]
    pub training_config: TrainingConfig,
}

impl CreateJob {
    pub fn new(model_name: impl Into<String>, training_config: TrainingConfig) -> Self {
        Self {
            model_name: model_name.into(),
            training_config,
        }
    }
}

/// Partial update moving a job to its next status
///
/// Each variant carries exactly the fields its target status owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "to", rename_all = "lowercase")]
pub enum Transition {
    Training {
        at: DateTime<Utc>,
    },
    Completed {
        at: DateTime<Utc>,
        evaluation: Evaluation,
        model_version: ModelVersion,
    },
    Failed {
        at: DateTime<Utc>,
        error: String,
        stage: Option<FailureStage>,
    },
    Rejected {
        at: DateTime<Utc>,
        reason: String,
    },
}

impl Transition {
    pub fn start(at: DateTime<Utc>) -> Self {
        Transition::Training { at }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Training { .. } => JobStatus::Training,
            Transition::Completed { .. } => JobStatus::Completed,
            Transition::Failed { .. } => JobStatus::Failed,
            Transition::Rejected { .. } => JobStatus::Rejected,
        }
    }

    /// The only status this transition may be applied to
    pub fn source(&self) -> JobStatus {
        match self {
            Transition::Training { .. } | Transition::Rejected { .. } => JobStatus::Triggered,
            Transition::Completed { .. } | Transition::Failed { .. } => JobStatus::Training,
        }
    }
}

/// Why a store refused a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The job is no longer in the transition's source status
    StatusChanged { current: JobStatus },
    /// Another job already holds the training slot for this model
    ModelBusy { active_job: Uuid },
}

/// Result of a compare-and-set update
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Applied(TrainingJob),
    Conflict(Conflict),
}

/// Notification emitted when a job record is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCreated {
    pub job_id: Uuid,
}
