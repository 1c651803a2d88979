//! Plugin trait.
//!
//! Plugins are extra checks run on the merged workspace after the build.
//! A plugin either succeeds silently, fails with an error, or returns a
//! [`PluginResult`] with a verdict and an artifact to compare the next run
//! against.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::executor::Executor;
use crate::staging::StagingBranches;
use crate::{Result, Ticket};

/// Everything a plugin may look at.
pub struct PluginContext<'a> {
    pub ticket: &'a Ticket,
    /// Root of the merged checkout.
    pub workspace: &'a Path,
    pub branches: &'a StagingBranches,
    /// Shell prefix invoking the project's make.
    pub make: &'a str,
    /// Path to the project's `sage` launcher.
    pub sage: &'a Path,
    /// Patch files for `base..ticket_merged`.
    pub patches: &'a [PathBuf],
    /// Artifact stored by this plugin on the last baseline run.
    pub baseline: Option<&'a Value>,
    pub executor: &'a dyn Executor,
    /// Per-ticket log file.
    pub log: &'a Path,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginResult {
    pub passed: bool,
    pub data: Option<Value>,
    /// Artifact cached for comparison. Defaults to `data`.
    pub baseline: Option<Value>,
}

impl PluginResult {
    pub fn new(passed: bool, data: Option<Value>) -> Self {
        Self {
            passed,
            baseline: data.clone(),
            data,
        }
    }

    pub fn with_baseline(mut self, baseline: Value) -> Self {
        self.baseline = Some(baseline);
        self
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registry name of this plugin.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>>;
}
