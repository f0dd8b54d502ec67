//! Service Module
//!
//! Business logic layer for the orchestrator. Services sit between the
//! repositories and the numerical backend and own the job lifecycle.

pub mod error;
pub mod features;
pub mod job;
pub mod pipeline;
pub mod registry;

pub use error::{OrchestratorError, PipelineError, StageError};
pub use job::{JobOrchestrator, JobOutcome};
pub use pipeline::{EvaluationMode, PipelineRun, TrainedModel, TrainingPipeline};
pub use registry::ModelRegistry;
