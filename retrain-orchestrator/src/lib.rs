//! Retrain Orchestrator
//!
//! Drives model retraining jobs from `triggered` to a terminal status.
//!
//! Architecture:
//! - Configuration: settings from environment variables with defaults
//! - Repositories: job store, dataset provider, schedule source and artifact
//!   store traits with in-memory, filesystem and PostgreSQL implementations
//! - Services: feature extraction, the training pipeline, the model registry
//!   and the job state machine
//! - Scheduler: weekly adapter that creates jobs when retraining is enabled

pub mod config;
pub mod db;
pub mod repository;
pub mod scheduler;
pub mod service;
