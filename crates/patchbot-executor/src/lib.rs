//! Process execution backends for the patchbot worker.
//!
//! Provides executor implementations for running build and test commands:
//! - Local shell processes in their own process group

pub mod local;

pub use local::LocalExecutor;
pub use patchbot_core::executor::{Executor, JobResult, JobSpec, JobStatus};
