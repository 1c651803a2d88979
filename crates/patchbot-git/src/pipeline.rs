//! The four-branch staging pipeline.
//!
//! `base` and `base_upstream` persist across tickets. `ticket_upstream` and
//! `ticket_merged` are recreated for every ticket: the ticket's branch is
//! fetched into `ticket_upstream` and merged onto a fresh copy of `base`.
//! Changes that touch more than the allow-listed source paths are either
//! refused or moved to a throwaway clone, so the primary checkout used for
//! every other ticket stays intact.

use async_trait::async_trait;
use patchbot_core::staging::{
    BaseAdvance, BaselinePolicy, StagedSnapshot, Staging, StagingBranches, StagingPolicy,
    Workspace,
};
use patchbot_core::{BaseVersion, RunId, Ticket};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::safety::{SafetyVerdict, classify};
use crate::space::ensure_free_space;
use crate::{Git, GitError, GitResult};

/// Directory name prefix of isolated clones.
pub const CLONE_PREFIX: &str = "patchbot-git-temp-";

pub struct StagingPipeline {
    root: PathBuf,
    git: Git,
    branches: StagingBranches,
    temp_dir: PathBuf,
    last_advance: Mutex<Option<Instant>>,
}

impl StagingPipeline {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            git: Git::new(&root),
            root,
            branches: StagingBranches::default(),
            temp_dir: std::env::temp_dir(),
            last_advance: Mutex::new(None),
        }
    }

    /// Where isolated clones are created.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    async fn ensure_repository(&self) -> GitResult<()> {
        if self.git.is_repository().await {
            Ok(())
        } else {
            Err(GitError::NotARepository(self.root.clone()))
        }
    }

    fn base_is_stale(&self, policy: &BaselinePolicy) -> bool {
        let last = self
            .last_advance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last.is_none_or(|at| at.elapsed() > policy.max_behind)
    }

    fn mark_advanced(&self) {
        let mut last = self
            .last_advance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    async fn fetch_and_merge(&self, ticket: &Ticket, policy: &StagingPolicy) -> GitResult<()> {
        let b = &self.branches;
        let branch = ticket
            .git_branch
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GitError::FetchFailed {
                refspec: String::new(),
                details: format!("ticket #{} has no branch", ticket.id),
            })?;
        let repo = ticket
            .git_repo
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&policy.default_repo);

        let refspec = format!("+{branch}:{}", b.ticket_upstream);
        info!(ticket = %ticket.id, repo = %repo, branch = %branch, "Fetching ticket branch");
        self.git
            .run(&["fetch", "-q", repo, &refspec])
            .await
            .map_err(|e| GitError::FetchFailed {
                refspec: refspec.clone(),
                details: e.to_string(),
            })?;

        self.git.force_branch(&b.ticket_merged, &b.base).await?;
        self.git.checkout(&b.ticket_merged).await?;

        if let Err(e) = self
            .git
            .run(&["merge", "--no-edit", "-X", "patience", &b.ticket_upstream])
            .await
        {
            if let Err(abort) = self.git.run(&["merge", "--abort"]).await {
                warn!(error = %abort, "Could not abort merge");
            }
            self.git.checkout(&b.base).await?;
            return Err(GitError::MergeConflict {
                details: e.to_string(),
            });
        }
        Ok(())
    }

    /// Copy the repository into a fresh directory and rebuild the staging
    /// branches there from the primary's.
    async fn clone_isolated(&self, ticket: &Ticket, free_space_gib: f64) -> GitResult<PathBuf> {
        if let Err(e) = self.ensure_temp_space(free_space_gib).await {
            warn!(error = %e, path = %self.temp_dir.display(), "No room for an isolated clone");
            self.git.checkout(&self.branches.base).await?;
            return Err(e);
        }

        let dir = self
            .temp_dir
            .join(format!("{CLONE_PREFIX}{}-{}", ticket.id, RunId::new()));
        info!(ticket = %ticket.id, path = %dir.display(), "Cloning into isolated workspace");

        let result = self.populate_clone(&dir).await;
        if let Err(e) = &result {
            warn!(error = %e, path = %dir.display(), "Isolated clone failed");
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }
        self.git.checkout(&self.branches.base).await?;
        result.map(|()| dir)
    }

    async fn ensure_temp_space(&self, required: f64) -> GitResult<()> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        ensure_free_space(&self.temp_dir, required)
    }

    async fn populate_clone(&self, dir: &Path) -> GitResult<()> {
        let dir_str = dir.to_string_lossy();
        let root_str = self.root.to_string_lossy();
        self.git.run(&["clone", "-q", &root_str, &dir_str]).await?;

        let upstream = self.root.join("upstream");
        if upstream.exists() {
            tokio::fs::symlink(&upstream, dir.join("upstream")).await?;
        }

        let clone = Git::new(dir);
        clone.run(&["checkout", "-q", "--detach"]).await?;
        for branch in self.branches.all() {
            clone
                .force_branch(branch, &format!("remotes/origin/{branch}"))
                .await?;
        }
        clone.checkout(&self.branches.ticket_merged).await
    }

    async fn describe_or_none(git: &Git, rev: &str, tag_only: bool) -> Option<String> {
        match git.describe(rev, tag_only).await {
            Ok(desc) => Some(desc),
            Err(e) => {
                debug!(rev = %rev, error = %e, "No version tag");
                None
            }
        }
    }

    /// Version named in the tree's `VERSION.txt`, e.g. `SageMath version 9.8, Release Date: ...`.
    async fn version_file(root: &Path) -> GitResult<BaseVersion> {
        let text = tokio::fs::read_to_string(root.join("VERSION.txt")).await?;
        text.split_whitespace()
            .nth(2)
            .map(|v| BaseVersion::parse(v.trim_end_matches(',')))
            .ok_or_else(|| GitError::Parse(format!("VERSION.txt: {:?}", text.trim())))
    }
}

#[async_trait]
impl Staging for StagingPipeline {
    fn branches(&self) -> &StagingBranches {
        &self.branches
    }

    async fn advance_base(&self, policy: &BaselinePolicy) -> patchbot_core::Result<BaseAdvance> {
        self.ensure_repository().await?;
        let b = &self.branches;

        if self.git.checkout(&b.base).await.is_err() {
            self.git.run(&["checkout", "-q", "-b", &b.base]).await?;
        }

        let refspec = format!("+{}:{}", policy.branch, b.base_upstream);
        self.git
            .run(&["fetch", "-q", &policy.repo, &refspec])
            .await
            .map_err(|e| GitError::UpstreamUnreachable {
                repo: policy.repo.clone(),
                details: e.to_string(),
            })?;

        let only_in_base = self
            .git
            .count(&format!("{}..{}", b.base_upstream, b.base))
            .await?;
        let only_in_upstream = self
            .git
            .count(&format!("{}..{}", b.base, b.base_upstream))
            .await?;

        let advanced = only_in_base > 0
            || only_in_upstream > policy.max_behind_commits
            || (only_in_upstream > 0 && self.base_is_stale(policy));

        if advanced {
            info!(only_in_base, only_in_upstream, "Advancing base to upstream");
            self.git.checkout(&b.base_upstream).await?;
            self.git.force_branch(&b.base, &b.base_upstream).await?;
            self.git.checkout(&b.base).await?;
            self.mark_advanced();
        } else {
            debug!(only_in_base, only_in_upstream, "Base is current");
        }

        Ok(BaseAdvance {
            advanced,
            only_in_base,
            only_in_upstream,
        })
    }

    async fn stage(&self, ticket: &Ticket, policy: &StagingPolicy) -> patchbot_core::Result<Workspace> {
        self.ensure_repository().await?;
        ensure_free_space(&self.root, policy.free_space_gib)?;
        let b = &self.branches;

        self.git.checkout(&b.base).await?;

        if ticket.is_baseline() {
            self.git.force_branch(&b.ticket_upstream, &b.base).await?;
            self.git.force_branch(&b.ticket_merged, &b.base).await?;
            return Ok(Workspace::primary(&self.root));
        }

        self.fetch_and_merge(ticket, policy).await?;

        let changed = self.git.changed_files(&b.merged_range()).await?;
        match classify(&changed, &policy.safety) {
            SafetyVerdict::Safe => {
                debug!(ticket = %ticket.id, files = changed.len(), "Change is safe to test in place");
                Ok(Workspace::primary(&self.root))
            }
            SafetyVerdict::Unsafe { offending } if policy.safe_only => {
                warn!(ticket = %ticket.id, files = ?offending, "Unsafe change, skipping");
                self.git.checkout(&b.base).await?;
                Err(GitError::UnsafeChange {
                    paths: offending,
                    cooldown: policy.unsafe_cooldown,
                }
                .into())
            }
            SafetyVerdict::Unsafe { offending } => {
                info!(ticket = %ticket.id, files = ?offending, "Unsafe change, testing in isolation");
                let dir = self.clone_isolated(ticket, policy.free_space_gib).await?;
                Ok(Workspace {
                    root: dir,
                    isolated: true,
                })
            }
        }
    }

    async fn commits_behind(&self, commit: &str) -> patchbot_core::Result<u64> {
        Ok(self
            .git
            .count(&format!("{commit}..{}", self.branches.base))
            .await?)
    }

    async fn base_version(&self) -> patchbot_core::Result<BaseVersion> {
        match Self::describe_or_none(&self.git, &self.branches.base, true).await {
            Some(tag) => Ok(BaseVersion::parse(&tag)),
            None => Ok(Self::version_file(&self.root).await?),
        }
    }

    async fn base_commit(&self) -> patchbot_core::Result<String> {
        Ok(self.git.commit_of(&self.branches.base).await?)
    }

    async fn checkout_merged(&self, workspace: &Workspace) -> patchbot_core::Result<()> {
        Ok(Git::new(&workspace.root)
            .checkout(&self.branches.ticket_merged)
            .await?)
    }

    async fn format_patches(&self, workspace: &Workspace, dir: &Path) -> patchbot_core::Result<Vec<PathBuf>> {
        let out = Git::new(&workspace.root)
            .run(&[
                "format-patch",
                "-q",
                "-o",
                &dir.to_string_lossy(),
                &self.branches.merged_range(),
            ])
            .await?;
        if !out.is_empty() {
            debug!(output = %out, "format-patch output");
        }

        let mut patches = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "patch") {
                patches.push(entry.path());
            }
        }
        patches.sort();
        Ok(patches)
    }

    async fn snapshot(&self, ticket: &Ticket, workspace: &Workspace) -> patchbot_core::Result<StagedSnapshot> {
        let git = Git::new(&workspace.root);
        let b = &self.branches;
        let mut snapshot = StagedSnapshot::default();

        let mut tags = Vec::new();
        if let Some(tag) = Self::describe_or_none(&git, &b.base, true).await {
            tags.push(BaseVersion::parse(&tag));
        }
        if !ticket.is_baseline() {
            if let Some(tag) = Self::describe_or_none(&git, &b.ticket_upstream, true).await {
                tags.push(BaseVersion::parse(&tag));
            }
        }
        snapshot.base = tags.into_iter().max();

        snapshot.git.git_base = git.commit_of(&b.base).await.ok();
        snapshot.git.git_base_human = Self::describe_or_none(&git, &b.base, false).await;
        snapshot.git.git_branch = ticket.git_branch.clone();

        if ticket.is_baseline() {
            snapshot.git.git_commit = snapshot.git.git_base.clone();
            snapshot.git.git_commit_human = snapshot.git.git_base_human.clone();
            snapshot.git.git_merge = snapshot.git.git_base.clone();
            snapshot.git.git_merge_human = snapshot.git.git_base_human.clone();
            return Ok(snapshot);
        }

        if let Some(base) = &snapshot.base {
            let range = format!("{}..{}", base, b.ticket_upstream);
            match git.run(&["log", "--oneline", &range]).await {
                Ok(log) => {
                    snapshot.git.git_log = log
                        .lines()
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                Err(e) => debug!(error = %e, "No ticket log"),
            }
        }
        snapshot.git.git_commit = git.commit_of(&b.ticket_upstream).await.ok();
        snapshot.git.git_commit_human = Self::describe_or_none(&git, &b.ticket_upstream, false).await;
        snapshot.git.git_merge = git.commit_of(&b.ticket_merged).await.ok();
        snapshot.git.git_merge_human = Self::describe_or_none(&git, &b.ticket_merged, false).await;
        Ok(snapshot)
    }

    async fn release(&self, workspace: &Workspace) -> patchbot_core::Result<()> {
        if !workspace.isolated {
            return Ok(());
        }
        let is_clone = workspace
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(CLONE_PREFIX));
        if !is_clone {
            warn!(path = %workspace.root.display(), "Refusing to remove unrecognised workspace");
            return Ok(());
        }
        info!(path = %workspace.root.display(), "Removing isolated workspace");
        tokio::fs::remove_dir_all(&workspace.root).await?;
        Ok(())
    }

    async fn cleanup_stale(&self) -> patchbot_core::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(CLONE_PREFIX) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Could not remove stale clone"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale isolated clones");
        }
        Ok(removed)
    }
}
