//! One ticket run: apply, build, plugins, tests.
//!
//! The run moves through [`RunState`]s in order. A failure ends it in the
//! state reached so far, which decides the reported status: failing while
//! `Started` is an apply failure, while `Applied` a build failure, while
//! `Built` a test failure. Transient and configuration errors end it as
//! `NetworkError` and a skip signal as `Skipped`, neither of which is
//! reported.

use async_trait::async_trait;
use patchbot_config::WorkerConfig;
use patchbot_core::executor::{Executor, JobSpec};
use patchbot_core::plugin::{Plugin, PluginContext};
use patchbot_core::staging::{StagedSnapshot, Staging, Workspace};
use patchbot_core::{
    Cooldown, Error, ErrorClass, PendingPhase, PluginOutcome, Report, ReportStatus, Result, Ticket,
    TicketId,
};
use patchbot_plugins::append_log;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ReportBuilder;

/// Where a ticket run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Started,
    Applied,
    /// Package ticket, not built.
    Spkg,
    Built,
    /// Plugin-only run, all plugins passed.
    Plugins,
    PluginsFailed,
    Tested,
    TestsPassedOnRetry,
    TestsPassedPluginsFailed,
    NetworkError,
    Skipped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Applied => "applied",
            RunState::Spkg => "spkg",
            RunState::Built => "built",
            RunState::Plugins => "plugins",
            RunState::PluginsFailed => "plugins_failed",
            RunState::Tested => "tested",
            RunState::TestsPassedOnRetry => "tests_passed_on_retry",
            RunState::TestsPassedPluginsFailed => "tests_passed_plugins_failed",
            RunState::NetworkError => "network_error",
            RunState::Skipped => "skipped",
        }
    }

    /// The status reported when a run ends in this state.
    pub fn report_status(&self) -> Option<ReportStatus> {
        match self {
            RunState::Started => Some(ReportStatus::ApplyFailed),
            RunState::Applied => Some(ReportStatus::BuildFailed),
            RunState::Built => Some(ReportStatus::TestsFailed),
            RunState::Spkg => Some(ReportStatus::Spkg),
            RunState::Plugins => Some(ReportStatus::PluginOnly),
            RunState::PluginsFailed => Some(ReportStatus::PluginOnlyFailed),
            RunState::Tested => Some(ReportStatus::TestsPassed),
            RunState::TestsPassedOnRetry => Some(ReportStatus::TestsPassedOnRetry),
            RunState::TestsPassedPluginsFailed => Some(ReportStatus::PluginFailed),
            RunState::NetworkError | RunState::Skipped => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunState::Tested | RunState::TestsPassedOnRetry | RunState::Plugins
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the `Pending` reports of a run as it progresses.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn pending(&self, ticket: TicketId, report: Report);
}

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub ticket: TicketId,
    pub state: RunState,
    /// Final report. `None` when the outcome is not the ticket's fault.
    pub report: Option<Report>,
    /// How long the ticket stays out of selection.
    pub cooldown: Option<Cooldown>,
    /// Workspace to release once reporting is done.
    pub workspace: Option<Workspace>,
    /// Human-readable log of the run.
    pub log: PathBuf,
    pub error: Option<String>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn status(&self) -> Option<ReportStatus> {
        self.report.as_ref().map(|r| r.status)
    }
}

/// What a run has produced so far.
#[derive(Debug)]
struct Progress {
    state: RunState,
    workspace: Option<Workspace>,
    snapshot: StagedSnapshot,
    plugins: Vec<PluginOutcome>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: RunState::Started,
            workspace: None,
            snapshot: StagedSnapshot::default(),
            plugins: Vec::new(),
        }
    }
}

/// Runs tickets through the phases with a fixed set of collaborators.
pub struct RunStateMachine {
    staging: Arc<dyn Staging>,
    executor: Arc<dyn Executor>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl RunStateMachine {
    pub fn new(
        staging: Arc<dyn Staging>,
        executor: Arc<dyn Executor>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        Self {
            staging,
            executor,
            plugins,
        }
    }

    /// Test `ticket` under `config`, all within `config.timeout`.
    pub async fn run(&self, ticket: &Ticket, config: &WorkerConfig, observer: &dyn RunObserver) -> RunOutcome {
        let started = Instant::now();
        let log = config.ticket_log(ticket.id);
        let mut progress = Progress::new();

        info!(ticket = %ticket.id, title = %ticket.title, "Testing ticket");

        let result = match start_log(&log, ticket, config).await {
            Ok(()) => {
                if !config.plugin_only {
                    let report = ReportBuilder::new(config, ticket, &progress.snapshot, &progress.plugins)
                        .pending(None);
                    observer.pending(ticket.id, report).await;
                }
                tokio::time::timeout(
                    config.timeout,
                    self.phases(ticket, config, &log, &mut progress, observer),
                )
                .await
            }
            Err(e) => Ok(Err(e)),
        };

        let (state, cooldown, error) = match result {
            Ok(Ok(state)) => {
                let cooldown = (state == RunState::Spkg).then_some(Cooldown::DEFECT);
                (state, cooldown, None)
            }
            Ok(Err(e)) => {
                let (state, cooldown) = classify(progress.state, &e);
                error!(ticket = %ticket.id, state = %state, phase = %progress.state, error = %e, "Run failed");
                (state, Some(cooldown), Some(e.to_string()))
            }
            Err(_) => {
                error!(ticket = %ticket.id, phase = %progress.state, timeout_secs = config.timeout.as_secs(), "Run timed out");
                let message = format!("timed out after {}s", config.timeout.as_secs());
                (progress.state, Some(Cooldown::DEFECT), Some(message))
            }
        };

        if let Some(message) = &error {
            if let Err(e) = append_log(&log, &format!("\n{message}\n")).await {
                debug!(ticket = %ticket.id, error = %e, "Could not write to ticket log");
            }
        }

        let report = match state.report_status() {
            Some(status) => {
                if progress.workspace.is_none() {
                    self.unstaged_snapshot(ticket, &mut progress.snapshot).await;
                }
                Some(ReportBuilder::new(config, ticket, &progress.snapshot, &progress.plugins).finish(status))
            }
            None => None,
        };

        let duration = started.elapsed();
        info!(ticket = %ticket.id, state = %state, elapsed_secs = duration.as_secs(), "Run finished");

        RunOutcome {
            ticket: ticket.id,
            state,
            report,
            cooldown,
            workspace: progress.workspace,
            log,
            error,
            duration,
        }
    }

    /// Fill in what a run that never got staged can still tell: the base and
    /// the commit it was asked to merge.
    async fn unstaged_snapshot(&self, ticket: &Ticket, snapshot: &mut StagedSnapshot) {
        if snapshot.base.is_none() {
            snapshot.base = self.staging.base_version().await.ok();
        }
        if snapshot.git.git_base.is_none() {
            snapshot.git.git_base = self.staging.base_commit().await.ok();
        }
        if snapshot.git.git_commit.is_none() {
            snapshot.git.git_commit = if ticket.is_baseline() {
                snapshot.git.git_base.clone()
            } else {
                ticket.git_commit.clone()
            };
        }
        if snapshot.git.git_branch.is_none() {
            snapshot.git.git_branch = ticket.git_branch.clone();
        }
    }

    async fn phases(
        &self,
        ticket: &Ticket,
        config: &WorkerConfig,
        log: &Path,
        progress: &mut Progress,
        observer: &dyn RunObserver,
    ) -> Result<RunState> {
        let workspace = self.staging.stage(ticket, &config.staging_policy()).await?;
        progress.workspace = Some(workspace.clone());
        progress.snapshot = match self.staging.snapshot(ticket, &workspace).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(ticket = %ticket.id, error = %e, "Could not record git metadata");
                StagedSnapshot::default()
            }
        };
        append_log(log, &format!("Merged into {}\n", workspace.root.display())).await?;
        self.reach(ticket, config, progress, RunState::Applied, PendingPhase::Applied, observer)
            .await;

        if !ticket.spkgs.is_empty() {
            info!(ticket = %ticket.id, spkgs = ?ticket.spkgs, "Package ticket, not building");
            return Ok(RunState::Spkg);
        }

        let vars = config.command_context(&workspace.root, ticket.id);
        if workspace.isolated {
            self.step("isolated-setup", &vars.interpolate(&config.commands.isolated_setup), &workspace, config, log)
                .await?;
        }
        for command in &config.commands.build {
            self.step("build", &vars.interpolate(command), &workspace, config, log)
                .await?;
        }
        self.reach(ticket, config, progress, RunState::Built, PendingPhase::Built, observer)
            .await;

        let patch_dir = tempfile::Builder::new()
            .prefix("patchbot-patches-")
            .tempdir()?;
        let patches = if ticket.is_baseline() {
            Vec::new()
        } else {
            self.staging.format_patches(&workspace, patch_dir.path()).await?
        };

        let plugins_passed = self
            .run_plugins(ticket, config, &workspace, &patches, log, progress)
            .await?;
        let phase = if plugins_passed {
            PendingPhase::PluginsPassed
        } else {
            PendingPhase::PluginsFailed
        };
        self.reach(ticket, config, progress, RunState::Built, phase, observer)
            .await;

        if config.plugin_only {
            return Ok(if plugins_passed {
                RunState::Plugins
            } else {
                RunState::PluginsFailed
            });
        }

        let test = if config.dry_run {
            &config.commands.dry_run_test
        } else {
            &config.commands.test
        };
        let mut state = RunState::Tested;
        if !self.attempt("test", &vars.interpolate(test), &workspace, config, log).await? {
            let retest = vars.interpolate(&config.commands.retest);
            let mut passed = false;
            for attempt in 1..=config.retries {
                info!(ticket = %ticket.id, attempt, retries = config.retries, "Re-running failed tests");
                if self.attempt("retest", &retest, &workspace, config, log).await? {
                    passed = true;
                    break;
                }
            }
            if !passed {
                return Err(Error::CommandFailed(format!(
                    "tests failed after {} retries",
                    config.retries
                )));
            }
            state = RunState::TestsPassedOnRetry;
        }

        if !plugins_passed {
            return Ok(RunState::TestsPassedPluginsFailed);
        }
        Ok(state)
    }

    async fn reach(
        &self,
        ticket: &Ticket,
        config: &WorkerConfig,
        progress: &mut Progress,
        state: RunState,
        phase: PendingPhase,
        observer: &dyn RunObserver,
    ) {
        progress.state = state;
        info!(ticket = %ticket.id, state = %state, "Reached state");
        if !config.plugin_only {
            let report =
                ReportBuilder::new(config, ticket, &progress.snapshot, &progress.plugins).pending(Some(phase));
            observer.pending(ticket.id, report).await;
        }
    }

    /// Run a command with its output in the ticket log. `Ok(false)` when it fails.
    async fn attempt(
        &self,
        name: &str,
        command: &str,
        workspace: &Workspace,
        config: &WorkerConfig,
        log: &Path,
    ) -> Result<bool> {
        append_log(log, &format!("\n$ {command}\n")).await?;
        let spec = JobSpec::new(name, command, &workspace.root)
            .with_env("MAKE", &config.make)
            .with_env("SAGE_ROOT", workspace.root.display().to_string())
            .with_log_file(log);
        let result = self.executor.run(spec).await?;
        debug!(step = name, status = ?result.status, secs = result.duration.as_secs(), "Step finished");
        Ok(result.succeeded())
    }

    async fn step(
        &self,
        name: &str,
        command: &str,
        workspace: &Workspace,
        config: &WorkerConfig,
        log: &Path,
    ) -> Result<()> {
        if self.attempt(name, command, workspace, config, log).await? {
            Ok(())
        } else {
            Err(Error::CommandFailed(format!("{name}: {command}")))
        }
    }

    /// Run every plugin, collecting outcomes. Returns whether all passed.
    async fn run_plugins(
        &self,
        ticket: &Ticket,
        config: &WorkerConfig,
        workspace: &Workspace,
        patches: &[PathBuf],
        log: &Path,
        progress: &mut Progress,
    ) -> Result<bool> {
        let sage = workspace.root.join("sage");
        let mut all_passed = true;

        for plugin in &self.plugins {
            let name = plugin.name();
            self.staging.checkout_merged(workspace).await?;

            let baseline = if ticket.is_baseline() {
                None
            } else {
                read_artifact(&config.plugin_artifact(TicketId::BASELINE, name)).await
            };
            append_log(log, &format!("\n{}\nRunning plugin {name}\n", "=".repeat(30))).await?;

            let ctx = PluginContext {
                ticket,
                workspace: &workspace.root,
                branches: self.staging.branches(),
                make: &config.make,
                sage: &sage,
                patches,
                baseline: baseline.as_ref(),
                executor: self.executor.as_ref(),
                log,
                dry_run: config.dry_run,
            };

            let outcome = match plugin.run(&ctx).await {
                Ok(None) => PluginOutcome {
                    name: name.to_string(),
                    passed: true,
                    data: None,
                },
                Ok(Some(result)) => {
                    if let Some(artifact) = &result.baseline {
                        let path = config.plugin_artifact(ticket.id, name);
                        if let Err(e) = write_artifact(&path, artifact).await {
                            warn!(plugin = name, path = %path.display(), error = %e, "Could not save plugin baseline");
                        }
                    }
                    PluginOutcome {
                        name: name.to_string(),
                        passed: result.passed,
                        data: result.data,
                    }
                }
                Err(e) => {
                    warn!(ticket = %ticket.id, plugin = name, error = %e, "Plugin raised an error");
                    append_log(log, &e.to_string()).await?;
                    PluginOutcome {
                        name: name.to_string(),
                        passed: false,
                        data: None,
                    }
                }
            };

            let verdict = if outcome.passed { "passed" } else { "failed" };
            info!(ticket = %ticket.id, plugin = name, passed = outcome.passed, "Plugin finished");
            append_log(log, &format!("{name} {verdict}\n")).await?;
            all_passed &= outcome.passed;
            progress.plugins.push(outcome);
        }

        Ok(all_passed)
    }
}

/// Final state and cooldown of a run that failed in `state`.
fn classify(state: RunState, err: &Error) -> (RunState, Cooldown) {
    match err.class() {
        ErrorClass::TransientInfrastructure | ErrorClass::ConfigurationFault => {
            (RunState::NetworkError, Cooldown::NETWORK)
        }
        ErrorClass::UnsafeChange => {
            let cooldown = match err {
                Error::Skip { cooldown, .. } => *cooldown,
                _ => Cooldown::Indefinitely,
            };
            (RunState::Skipped, cooldown)
        }
        ErrorClass::TicketDefect => (state, Cooldown::DEFECT),
    }
}

async fn start_log(log: &Path, ticket: &Ticket, config: &WorkerConfig) -> Result<()> {
    if let Some(dir) = log.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Configuration(format!("log directory {}: {e}", dir.display())))?;
    }
    let header = format!(
        "Testing #{} ({}) on {}\nbranch: {}\ncommit: {}\nmachine: {}\n",
        ticket.id,
        ticket.title,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
        ticket.git_branch.as_deref().unwrap_or("-"),
        ticket.git_commit.as_deref().unwrap_or("-"),
        config.machine,
    );
    tokio::fs::write(log, header).await?;
    Ok(())
}

async fn read_artifact(path: &Path) -> Option<Value> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable plugin baseline");
            None
        }
    }
}

async fn write_artifact(path: &Path, artifact: &Value) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let raw = serde_json::to_vec(artifact).map_err(|e| Error::Internal(e.to_string()))?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeStaging, RecordingObserver, ScriptedExecutor, StageBehaviour, test_config, ticket,
    };
    use patchbot_core::TicketStatus;
    use patchbot_core::plugin::PluginResult;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Plugin with a fixed answer that remembers the baseline it was given.
    struct StubPlugin {
        name: &'static str,
        answer: fn() -> Result<Option<PluginResult>>,
        seen_baseline: Mutex<Vec<Option<Value>>>,
    }

    impl StubPlugin {
        fn new(name: &'static str, answer: fn() -> Result<Option<PluginResult>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                answer,
                seen_baseline: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Plugin for StubPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, ctx: &PluginContext<'_>) -> Result<Option<PluginResult>> {
            self.seen_baseline.lock().unwrap().push(ctx.baseline.cloned());
            (self.answer)()
        }
    }

    fn silent() -> Result<Option<PluginResult>> {
        Ok(None)
    }

    fn failing() -> Result<Option<PluginResult>> {
        Err(Error::CommandFailed("docbuild".to_string()))
    }

    fn counting() -> Result<Option<PluginResult>> {
        Ok(Some(PluginResult::new(true, Some(json!({"count": 3})))))
    }

    struct Harness {
        dir: TempDir,
        config: WorkerConfig,
        staging: Arc<FakeStaging>,
        executor: Arc<ScriptedExecutor>,
        plugins: Vec<Arc<dyn Plugin>>,
        observer: RecordingObserver,
    }

    impl Harness {
        fn new(executor: ScriptedExecutor) -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                config: test_config(dir.path()),
                staging: Arc::new(FakeStaging::new(dir.path())),
                executor: Arc::new(executor),
                plugins: Vec::new(),
                observer: RecordingObserver::default(),
                dir,
            }
        }

        fn staging(mut self, behaviour: StageBehaviour) -> Self {
            self.staging = Arc::new(FakeStaging::new(self.dir.path()).with_behaviour(behaviour));
            self
        }

        fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
            self.plugins.push(plugin);
            self
        }

        async fn run(&self, ticket: &Ticket) -> RunOutcome {
            RunStateMachine::new(self.staging.clone(), self.executor.clone(), self.plugins.clone())
                .run(ticket, &self.config, &self.observer)
                .await
        }
    }

    #[test]
    fn test_state_status_mapping() {
        assert_eq!(RunState::Started.report_status(), Some(ReportStatus::ApplyFailed));
        assert_eq!(RunState::Applied.report_status(), Some(ReportStatus::BuildFailed));
        assert_eq!(RunState::Built.report_status(), Some(ReportStatus::TestsFailed));
        assert_eq!(
            RunState::TestsPassedPluginsFailed.report_status(),
            Some(ReportStatus::PluginFailed)
        );
        assert_eq!(RunState::PluginsFailed.report_status(), Some(ReportStatus::PluginOnlyFailed));
        assert_eq!(RunState::NetworkError.report_status(), None);
        assert_eq!(RunState::Skipped.report_status(), None);
        assert_eq!(RunState::TestsPassedOnRetry.to_string(), "tests_passed_on_retry");
    }

    #[tokio::test]
    async fn test_passing_run() {
        let harness = Harness::new(ScriptedExecutor::new()).plugin(StubPlugin::new("commit_messages", silent));
        let outcome = harness.run(&ticket(5, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::Tested);
        assert_eq!(outcome.status(), Some(ReportStatus::TestsPassed));
        assert!(outcome.cooldown.is_none());
        assert!(outcome.error.is_none());

        let report = outcome.report.unwrap();
        assert_eq!(report.plugins.len(), 1);
        assert!(report.plugins[0].passed);
        assert_eq!(report.git.git_base.as_deref(), Some("base0"));

        assert_eq!(
            harness.observer.phases(),
            vec![
                None,
                Some(PendingPhase::Applied),
                Some(PendingPhase::Built),
                Some(PendingPhase::PluginsPassed),
            ]
        );
        assert!(harness.observer.reports().iter().all(Report::is_pending));

        assert!(harness.executor.ran("make build"));
        assert!(harness.executor.ran("-t -p 2 --all --long"));
        assert!(!harness.executor.ran("--failed"));
        assert_eq!(harness.staging.called("format-patch"), 1);
        assert_eq!(harness.staging.called("checkout"), 1);

        let log = std::fs::read_to_string(&outcome.log).unwrap();
        assert!(log.starts_with("Testing #5 (Ticket 5)"));
        assert!(log.contains("commit_messages passed"));
    }

    #[tokio::test]
    async fn test_merge_conflict_is_apply_failure() {
        let harness = Harness::new(ScriptedExecutor::new()).staging(StageBehaviour::Conflict);
        let t = ticket(6, TicketStatus::NeedsReview);
        let outcome = harness.run(&t).await;

        assert_eq!(outcome.state, RunState::Started);
        assert_eq!(outcome.status(), Some(ReportStatus::ApplyFailed));
        assert_eq!(outcome.cooldown, Some(Cooldown::DEFECT));
        assert!(harness.executor.commands().is_empty());

        let report = outcome.report.unwrap();
        assert_eq!(report.base, Some(harness.staging.base.clone()));
        assert_eq!(report.git.git_base.as_deref(), Some("base0"));
        assert_eq!(report.git.git_commit, t.git_commit);
        assert_eq!(report.fingerprint(), t.fingerprint());

        // Counts as a current report, so the ticket is not picked again.
        let current = patchbot_store::current_reports(
            t.id,
            &t.fingerprint(),
            &[report],
            &patchbot_store::ReportQuery::on_base(harness.staging.base.clone()),
        );
        assert_eq!(current.len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_skips_tests() {
        let harness = Harness::new(ScriptedExecutor::new().fail("make build"));
        let outcome = harness.run(&ticket(7, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.status(), Some(ReportStatus::BuildFailed));
        assert!(!harness.executor.ran("sage -t"));
        assert!(!harness.executor.ran("sage-starts"));
        assert_eq!(
            harness.observer.phases(),
            vec![None, Some(PendingPhase::Applied)]
        );
    }

    #[tokio::test]
    async fn test_pass_on_retry_is_distinct() {
        let harness = Harness::new(ScriptedExecutor::new().fail_times("--all --long", 1));
        let outcome = harness.run(&ticket(8, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::TestsPassedOnRetry);
        assert_eq!(outcome.status(), Some(ReportStatus::TestsPassedOnRetry));
        assert_eq!(harness.executor.count("--failed"), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut harness = Harness::new(ScriptedExecutor::new().fail("--all --long"));
        harness.config.retries = 2;
        let outcome = harness.run(&ticket(9, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.status(), Some(ReportStatus::TestsFailed));
        assert_eq!(outcome.cooldown, Some(Cooldown::DEFECT));
        assert_eq!(harness.executor.count("--failed"), 2);
    }

    #[tokio::test]
    async fn test_plugin_failure_with_passing_tests() {
        let harness = Harness::new(ScriptedExecutor::new())
            .plugin(StubPlugin::new("docbuild", failing))
            .plugin(StubPlugin::new("commit_messages", silent));
        let outcome = harness.run(&ticket(10, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::TestsPassedPluginsFailed);
        assert_eq!(outcome.status(), Some(ReportStatus::PluginFailed));
        let plugins = outcome.report.unwrap().plugins;
        // A failing plugin does not stop the others.
        assert_eq!(plugins.len(), 2);
        assert!(!plugins[0].passed);
        assert!(plugins[1].passed);
        assert_eq!(
            harness.observer.phases().last(),
            Some(&Some(PendingPhase::PluginsFailed))
        );
    }

    #[tokio::test]
    async fn test_plugin_only() {
        let mut harness = Harness::new(ScriptedExecutor::new()).plugin(StubPlugin::new("docbuild", failing));
        harness.config.plugin_only = true;
        let outcome = harness.run(&ticket(11, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.status(), Some(ReportStatus::PluginOnlyFailed));
        assert!(!harness.executor.ran("sage -t"));
        assert!(harness.observer.phases().is_empty());
    }

    #[tokio::test]
    async fn test_network_error_is_not_reported() {
        let harness = Harness::new(ScriptedExecutor::new()).staging(StageBehaviour::Unreachable);
        let outcome = harness.run(&ticket(12, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::NetworkError);
        assert!(outcome.report.is_none());
        assert_eq!(outcome.cooldown, Some(Cooldown::NETWORK));
    }

    #[tokio::test]
    async fn test_configuration_fault_during_staging() {
        let harness = Harness::new(ScriptedExecutor::new()).staging(StageBehaviour::NoSpace);
        let outcome = harness.run(&ticket(13, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::NetworkError);
        assert_eq!(outcome.cooldown, Some(Cooldown::NETWORK));
    }

    #[tokio::test]
    async fn test_unsafe_change_is_skipped() {
        let cooldown = Cooldown::For(Duration::from_secs(7200));
        let harness = Harness::new(ScriptedExecutor::new()).staging(StageBehaviour::Unsafe(cooldown));
        let outcome = harness.run(&ticket(14, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::Skipped);
        assert!(outcome.report.is_none());
        assert_eq!(outcome.cooldown, Some(cooldown));
    }

    #[tokio::test]
    async fn test_package_ticket() {
        let harness = Harness::new(ScriptedExecutor::new());
        let mut t = ticket(15, TicketStatus::NeedsReview);
        t.spkgs = vec!["pari-2.15.spkg".to_string()];
        let outcome = harness.run(&t).await;

        assert_eq!(outcome.status(), Some(ReportStatus::Spkg));
        assert_eq!(outcome.cooldown, Some(Cooldown::DEFECT));
        assert!(harness.executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_isolated_workspace_runs_setup() {
        let harness = Harness::new(ScriptedExecutor::new()).staging(StageBehaviour::Isolated);
        let outcome = harness.run(&ticket(16, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.state, RunState::Tested);
        assert!(outcome.workspace.unwrap().isolated);
        assert_eq!(harness.executor.commands()[0], "make configure && ./configure");
    }

    #[tokio::test]
    async fn test_dry_run_uses_reduced_tests() {
        let mut harness = Harness::new(ScriptedExecutor::new());
        harness.config.dry_run = true;
        harness.run(&ticket(17, TicketStatus::NeedsReview)).await;

        assert!(harness.executor.ran("src/sage/misc/a*.py"));
        assert!(!harness.executor.ran("--all --long"));
    }

    #[tokio::test]
    async fn test_watchdog_fails_the_phase_in_flight() {
        let mut harness = Harness::new(ScriptedExecutor::new().hang("make build"));
        harness.config.timeout = Duration::from_millis(100);
        let outcome = harness.run(&ticket(18, TicketStatus::NeedsReview)).await;

        assert_eq!(outcome.status(), Some(ReportStatus::BuildFailed));
        assert_eq!(outcome.cooldown, Some(Cooldown::DEFECT));
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_plugin_baselines() {
        let harness = Harness::new(ScriptedExecutor::new());
        let plugin = StubPlugin::new("startup_modules", counting);
        let harness = harness.plugin(plugin.clone());

        // The baseline run stores the artifact under ticket 0.
        let base = harness.run(&Ticket::baseline("develop")).await;
        assert_eq!(base.state, RunState::Tested);
        assert_eq!(harness.staging.called("format-patch"), 0);
        let stored = harness.config.plugin_artifact(TicketId::BASELINE, "startup_modules");
        let saved: Value = serde_json::from_slice(&std::fs::read(&stored).unwrap()).unwrap();
        assert_eq!(saved, json!({"count": 3}));

        // Other tickets are handed that artifact.
        harness.run(&ticket(19, TicketStatus::NeedsReview)).await;
        let seen = plugin.seen_baseline.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some(json!({"count": 3}))]);
    }
}
