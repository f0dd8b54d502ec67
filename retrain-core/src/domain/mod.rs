//! Core domain types
//!
//! This module contains the core domain structures used across the retraining services.
//! The orchestrator persists and mutates them; the trainer backend only reads
//! feature sets and produces artifacts.

pub mod config;
pub mod features;
pub mod job;
pub mod model;
pub mod report;
pub mod schedule;
