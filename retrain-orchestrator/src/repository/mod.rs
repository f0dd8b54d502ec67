//! Repository layer
//!
//! Storage seams the orchestrator talks to. Each trait is the contract of an
//! external collaborator; the implementations here are the adapters the
//! binary wires up (PostgreSQL or memory for jobs, the filesystem for
//! datasets, schedules and artifacts).
//!
//! All repositories are trait-based to enable testing and swapping backends.

mod artifact;
mod dataset;
mod error;
mod job;
mod job_pg;
mod schedule;

// Re-export traits
pub use artifact::ArtifactStore;
pub use dataset::DatasetProvider;
pub use job::JobStore;
pub use schedule::ScheduleSource;

// Re-export implementations
pub use artifact::{FsArtifactStore, InMemoryArtifactStore};
pub use dataset::{FsDatasetProvider, InMemoryDatasetProvider};
pub use job::InMemoryJobStore;
pub use job_pg::PgJobStore;
pub use schedule::{FsScheduleSource, InMemoryScheduleSource};

pub use error::{StoreError, validate_key};
