//! Retrain Core
//!
//! Core types and abstractions for the model retraining service.
//!
//! This crate contains:
//! - Domain types: training jobs, raw reports, feature sets, model artifacts, schedules
//! - DTOs: job creation requests and lifecycle transitions
//! - Capabilities: the `Trainer` / `Evaluator` seams a numerical backend implements

pub mod capability;
pub mod domain;
pub mod dto;
