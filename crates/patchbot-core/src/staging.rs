//! Staging of a ticket's change onto the baseline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BaseVersion, Cooldown, GitSnapshot, Result, Ticket};

/// The four branches of the staging protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingBranches {
    /// Last known-good baseline.
    pub base: String,
    /// Mirror of the canonical upstream baseline.
    pub base_upstream: String,
    /// Pristine fetch of the ticket's change.
    pub ticket_upstream: String,
    /// `ticket_upstream` merged onto `base`.
    pub ticket_merged: String,
}

impl StagingBranches {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            base: format!("{prefix}/base"),
            base_upstream: format!("{prefix}/base_upstream"),
            ticket_upstream: format!("{prefix}/ticket_upstream"),
            ticket_merged: format!("{prefix}/ticket_merged"),
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [
            &self.base,
            &self.base_upstream,
            &self.ticket_upstream,
            &self.ticket_merged,
        ]
    }

    /// `base..ticket_merged`
    pub fn merged_range(&self) -> String {
        format!("{}..{}", self.base, self.ticket_merged)
    }
}

impl Default for StagingBranches {
    fn default() -> Self {
        Self::with_prefix("patchbot")
    }
}

/// Paths a ticket may touch and still be tested in the primary workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRules {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    pub exact: Vec<String>,
}

impl SafetyRules {
    pub fn allows(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
            || self.exact.iter().any(|e| path == e)
    }
}

impl Default for SafetyRules {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            prefixes: owned(&[
                "src/sage",
                "src/sage_setup",
                "src/doc",
                "src/.tox",
                "build/pkgs",
            ]),
            suffixes: owned(&[".yml", ".txt", ".json", ".ini", ".md"]),
            exact: owned(&[
                "src/setup.py",
                ".gitignore",
                "src/bin/sage-banner",
                "src/bin/sage-version.sh",
            ]),
        }
    }
}

/// Per-ticket staging policy.
#[derive(Debug, Clone)]
pub struct StagingPolicy {
    /// Refuse to test unsafe changes instead of isolating them.
    pub safe_only: bool,
    /// Cooldown attached to the skip signal raised for unsafe changes.
    pub unsafe_cooldown: Cooldown,
    pub safety: SafetyRules,
    /// Minimum free disk space, in GiB.
    pub free_space_gib: f64,
    /// Repository used for tickets that do not name one.
    pub default_repo: String,
}

/// When the baseline may move.
#[derive(Debug, Clone)]
pub struct BaselinePolicy {
    pub repo: String,
    pub branch: String,
    pub max_behind_commits: u64,
    pub max_behind: Duration,
}

/// Outcome of a baseline advancement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseAdvance {
    pub advanced: bool,
    pub only_in_base: u64,
    pub only_in_upstream: u64,
}

/// A materialized checkout of `ticket_merged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    /// The checkout is a throwaway clone, not the primary workspace.
    pub isolated: bool,
}

impl Workspace {
    pub fn primary(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            isolated: false,
        }
    }
}

/// Report fields derived from the staged branches.
#[derive(Debug, Clone, Default)]
pub struct StagedSnapshot {
    pub base: Option<BaseVersion>,
    pub git: GitSnapshot,
}

#[async_trait]
pub trait Staging: Send + Sync {
    /// The staging branch names.
    fn branches(&self) -> &StagingBranches;

    /// Fetch upstream into `base_upstream` and move `base` when the policy says so.
    async fn advance_base(&self, policy: &BaselinePolicy) -> Result<BaseAdvance>;

    /// Produce `ticket_merged` for `ticket`.
    async fn stage(&self, ticket: &Ticket, policy: &StagingPolicy) -> Result<Workspace>;

    /// Number of commits in `base` that are not in `commit`.
    async fn commits_behind(&self, commit: &str) -> Result<u64>;

    /// Version of the current baseline.
    async fn base_version(&self) -> Result<BaseVersion>;

    /// Commit `base` points at.
    async fn base_commit(&self) -> Result<String>;

    /// Check out `ticket_merged` again.
    async fn checkout_merged(&self, workspace: &Workspace) -> Result<()>;

    /// Write `base..ticket_merged` as patch files into `dir`.
    async fn format_patches(&self, workspace: &Workspace, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Collect the git fields of a report.
    async fn snapshot(&self, ticket: &Ticket, workspace: &Workspace) -> Result<StagedSnapshot>;

    /// Dispose of a workspace after reporting. A no-op for the primary one.
    async fn release(&self, workspace: &Workspace) -> Result<()>;

    /// Remove isolated clones left behind by earlier runs.
    async fn cleanup_stale(&self) -> Result<usize>;
}
