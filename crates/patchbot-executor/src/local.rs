//! Local shell executor.
//!
//! Every job runs under `sh -c` as the leader of a fresh process group.
//! When the job times out, or its future is dropped, the whole group is
//! killed, so builds that fork compilers and test runners leave nothing
//! behind.

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use patchbot_core::executor::*;
use patchbot_core::{Error, Result};
use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs jobs as local shell processes.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command(&self, spec: &JobSpec) -> Result<Command> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .process_group(0);

        match &spec.log_file {
            Some(path) => {
                let stdout = OpenOptions::new().create(true).append(true).open(path)?;
                let stderr = stdout.try_clone()?;
                cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
            }
            None => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }
        Ok(cmd)
    }
}

/// Kills a job's process group unless disarmed.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader.and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid = %pgid, "Killing process group");
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                // ESRCH: the group is already gone.
                debug!(pgid = %pgid, error = %e, "killpg failed");
            }
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: JobSpec) -> Result<JobResult> {
        let started = Instant::now();
        let mut cmd = self.command(&spec)?;

        info!(job = %spec.name, command = %spec.command, dir = %spec.working_dir.display(), "Running job");
        let child = cmd
            .spawn()
            .map_err(|e| Error::CommandFailed(format!("{}: {}", spec.name, e)))?;
        let mut guard = ProcessGroupGuard::new(child.id());

        let wait = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(job = %spec.name, timeout_secs = limit.as_secs(), "Job timed out");
                    drop(guard);
                    return Ok(JobResult {
                        status: JobStatus::TimedOut,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration: started.elapsed(),
                    });
                }
            },
            None => wait.await?,
        };
        guard.disarm();

        let status = if output.status.success() {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed {
                exit_code: output.status.code(),
            }
        };
        let duration = started.elapsed();
        info!(job = %spec.name, status = ?status, duration_ms = duration.as_millis() as u64, "Job finished");

        Ok(JobResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        })
    }
}
