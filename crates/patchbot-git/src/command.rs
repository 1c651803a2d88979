//! Running git.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::{GitError, GitResult};

/// Identity and date pinned on every commit git makes for us, so that
/// merge commits are identical across workers.
const PINNED_ENV: [(&str, &str); 6] = [
    ("GIT_AUTHOR_NAME", "patchbot"),
    ("GIT_AUTHOR_EMAIL", "patchbot@localhost"),
    ("GIT_AUTHOR_DATE", "1970-01-01T00:00:01"),
    ("GIT_COMMITTER_NAME", "patchbot"),
    ("GIT_COMMITTER_EMAIL", "patchbot@localhost"),
    ("GIT_COMMITTER_DATE", "1970-01-01T00:00:01"),
];

/// Git bound to one working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .envs(PINNED_ENV)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run git and return its trimmed stdout.
    pub async fn run(&self, args: &[&str]) -> GitResult<String> {
        debug!(workdir = %self.workdir.display(), args = ?args, "Running git");
        let output = self.command(args).output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Run git and report only whether it succeeded.
    pub async fn succeeds(&self, args: &[&str]) -> GitResult<bool> {
        let output = self.command(args).output().await?;
        Ok(output.status.success())
    }

    /// `git rev-list --count <range>`
    pub async fn count(&self, range: &str) -> GitResult<u64> {
        let out = self.run(&["rev-list", "--count", range]).await?;
        out.parse()
            .map_err(|_| GitError::Parse(format!("rev-list count {out:?}")))
    }

    /// Commit hash a local branch points at.
    pub async fn commit_of(&self, branch: &str) -> GitResult<String> {
        self.run(&["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .await
    }

    /// Nearest version tag of `rev`, either in full (`9.8.beta2-14-gabc123`)
    /// or just the tag.
    pub async fn describe(&self, rev: &str, tag_only: bool) -> GitResult<String> {
        let out = self
            .run(&["describe", "--tags", "--match", "[0-9].[0-9]*", rev])
            .await?;
        Ok(if tag_only {
            out.split('-').next().unwrap_or_default().to_string()
        } else {
            out
        })
    }

    /// Files changed across `range`.
    pub async fn changed_files(&self, range: &str) -> GitResult<Vec<String>> {
        let out = self.run(&["diff", "--name-only", range]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn checkout(&self, branch: &str) -> GitResult<()> {
        self.run(&["checkout", "-q", branch]).await.map(drop)
    }

    /// Point `branch` at `target`, creating it if needed.
    pub async fn force_branch(&self, branch: &str, target: &str) -> GitResult<()> {
        self.run(&["branch", "-f", branch, target]).await.map(drop)
    }

    pub async fn is_repository(&self) -> bool {
        self.succeeds(&["rev-parse", "--git-dir"])
            .await
            .unwrap_or(false)
    }
}
