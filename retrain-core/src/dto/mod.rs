//! Data Transfer Objects
//!
//! Requests and partial updates exchanged between the orchestrator, the
//! scheduler adapter and job store implementations.

pub mod job;
