//! Scheduler layer
//!
//! Decides when retraining is due and creates the job record. Everything
//! after creation belongs to the orchestrator.

pub mod adapter;

pub use adapter::SchedulerAdapter;
