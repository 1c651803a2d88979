//! Executor trait and job types.
//!
//! Executors run the build, test and plugin commands of a ticket run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::Result;

/// Specification for a command to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Short label used in logs.
    pub name: String,
    /// Shell command line.
    pub command: String,
    /// Directory the command runs in.
    pub working_dir: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Append stdout and stderr to this file instead of capturing them.
    pub log_file: Option<PathBuf>,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            log_file: None,
            timeout: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Final status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    /// Captured output. Empty when the job wrote to a log file.
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }
}

/// Trait for command executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run a job to completion.
    ///
    /// Dropping the returned future terminates the job and everything it spawned.
    async fn run(&self, spec: JobSpec) -> Result<JobResult>;
}
