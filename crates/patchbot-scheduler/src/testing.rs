//! Fakes for the worker's collaborators.

use async_trait::async_trait;
use chrono::Utc;
use patchbot_config::WorkerConfig;
use patchbot_core::executor::{Executor, JobResult, JobSpec, JobStatus};
use patchbot_core::source::TicketSource;
use patchbot_core::staging::{
    BaseAdvance, BaselinePolicy, StagedSnapshot, Staging, StagingBranches, StagingPolicy, Workspace,
};
use patchbot_core::{
    BaseVersion, Cooldown, Error, GitSnapshot, MachineIdentity, PendingPhase, Report, ReportStatus,
    Result, Ticket, TicketId, TicketStatus,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::run::RunObserver;

pub(crate) fn machine() -> MachineIdentity {
    MachineIdentity::new(["Ubuntu", "22.04", "x86_64", "5.15.0", "testbox"])
}

pub(crate) fn test_config(root: &Path) -> WorkerConfig {
    let mut config = WorkerConfig::with_root(root);
    config.log_dir = root.join("logs");
    config.machine = machine();
    config.idle = Duration::ZERO;
    config.timeout = Duration::from_secs(60);
    config.make = "make".to_string();
    config.parallelism = 2;
    config
}

pub(crate) fn ticket(id: u64, status: TicketStatus) -> Ticket {
    Ticket {
        id: TicketId::new(id),
        title: format!("Ticket {id}"),
        status,
        priority: "minor".to_string(),
        component: "misc".to_string(),
        milestone: "sage-9.8".to_string(),
        authors: vec!["alice".to_string()],
        git_branch: Some(format!("u/alice/{id}")),
        git_commit: Some(format!("c0ffee{id}")),
        ..Default::default()
    }
}

/// A report comparable to `ticket`, made on `version` at base commit `git_base`.
pub(crate) fn report(
    ticket: &Ticket,
    status: ReportStatus,
    machine: MachineIdentity,
    version: &str,
    git_base: &str,
) -> Report {
    Report {
        status,
        deps: ticket.depends_on.clone(),
        spkgs: ticket.spkgs.clone(),
        base: Some(BaseVersion::parse(version)),
        machine,
        time: Utc::now(),
        plugins: Vec::new(),
        pending_status: None,
        user: None,
        owner: None,
        patchbot_version: None,
        git: GitSnapshot {
            git_base: Some(git_base.to_string()),
            git_commit: ticket.git_commit.clone(),
            ..Default::default()
        },
    }
}

fn finished(status: JobStatus) -> JobResult {
    JobResult {
        status,
        stdout: String::new(),
        stderr: String::new(),
        duration: Duration::from_millis(1),
    }
}

/// Answers commands by substring match. A scripted sequence is consumed in
/// order and its last entry repeats; unscripted commands succeed.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    script: Mutex<Vec<(String, VecDeque<JobStatus>)>>,
    hang: Vec<String>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(self, pattern: &str) -> Self {
        self.script(pattern, [JobStatus::Failed { exit_code: Some(1) }])
    }

    /// Fail `times` times, then succeed.
    pub(crate) fn fail_times(self, pattern: &str, times: usize) -> Self {
        let mut sequence: Vec<JobStatus> = vec![JobStatus::Failed { exit_code: Some(1) }; times];
        sequence.push(JobStatus::Succeeded);
        self.script(pattern, sequence)
    }

    /// Never finish a matching command.
    pub(crate) fn hang(mut self, pattern: &str) -> Self {
        self.hang.push(pattern.to_string());
        self
    }

    fn script(self, pattern: &str, sequence: impl IntoIterator<Item = JobStatus>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push((pattern.to_string(), sequence.into_iter().collect()));
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    pub(crate) fn ran(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, spec: JobSpec) -> Result<JobResult> {
        self.commands.lock().unwrap().push(spec.command.clone());
        if self.hang.iter().any(|p| spec.command.contains(p.as_str())) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let status = {
            let mut script = self.script.lock().unwrap();
            script
                .iter_mut()
                .find(|(pattern, _)| spec.command.contains(pattern.as_str()))
                .and_then(|(_, sequence)| {
                    if sequence.len() > 1 {
                        sequence.pop_front()
                    } else {
                        sequence.front().cloned()
                    }
                })
                .unwrap_or(JobStatus::Succeeded)
        };
        Ok(finished(status))
    }
}

/// What `FakeStaging::stage` does.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StageBehaviour {
    Apply,
    Isolated,
    Conflict,
    Unsafe(Cooldown),
    Unreachable,
    NoSpace,
}

pub(crate) struct FakeStaging {
    root: PathBuf,
    branches: StagingBranches,
    pub(crate) base: BaseVersion,
    behaviour: Mutex<StageBehaviour>,
    behind: HashMap<String, u64>,
    advances: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<String>>,
}

impl FakeStaging {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            branches: StagingBranches::default(),
            base: BaseVersion::parse("9.8"),
            behaviour: Mutex::new(StageBehaviour::Apply),
            behind: HashMap::new(),
            advances: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_behind(mut self, commit: &str, commits: u64) -> Self {
        self.behind.insert(commit.to_string(), commits);
        self
    }

    pub(crate) fn with_behaviour(self, behaviour: StageBehaviour) -> Self {
        *self.behaviour.lock().unwrap() = behaviour;
        self
    }

    /// Results of the next `advance_base` calls. Afterwards the base stays put.
    pub(crate) fn with_advances(self, advances: &[bool]) -> Self {
        self.advances.lock().unwrap().extend(advances);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn called(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Staging for FakeStaging {
    fn branches(&self) -> &StagingBranches {
        &self.branches
    }

    async fn advance_base(&self, _policy: &BaselinePolicy) -> Result<BaseAdvance> {
        self.record("advance");
        let advanced = self.advances.lock().unwrap().pop_front().unwrap_or(false);
        Ok(BaseAdvance {
            advanced,
            only_in_base: 0,
            only_in_upstream: u64::from(advanced),
        })
    }

    async fn stage(&self, ticket: &Ticket, _policy: &StagingPolicy) -> Result<Workspace> {
        self.record(format!("stage #{}", ticket.id));
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            StageBehaviour::Apply => Ok(Workspace::primary(&self.root)),
            StageBehaviour::Isolated => Ok(Workspace {
                root: self.root.clone(),
                isolated: true,
            }),
            StageBehaviour::Conflict => Err(Error::MergeConflict(format!("#{}", ticket.id))),
            StageBehaviour::Unsafe(cooldown) => Err(Error::skip("touches build files", cooldown)),
            StageBehaviour::Unreachable => Err(Error::Network("fetch failed".to_string())),
            StageBehaviour::NoSpace => Err(Error::Configuration("not enough free space".to_string())),
        }
    }

    async fn commits_behind(&self, commit: &str) -> Result<u64> {
        self.behind
            .get(commit)
            .copied()
            .ok_or_else(|| Error::NotFound(commit.to_string()))
    }

    async fn base_version(&self) -> Result<BaseVersion> {
        Ok(self.base.clone())
    }

    async fn base_commit(&self) -> Result<String> {
        Ok("base0".to_string())
    }

    async fn checkout_merged(&self, _workspace: &Workspace) -> Result<()> {
        self.record("checkout");
        Ok(())
    }

    async fn format_patches(&self, _workspace: &Workspace, dir: &Path) -> Result<Vec<PathBuf>> {
        self.record("format-patch");
        let patch = dir.join("0001-change.patch");
        tokio::fs::write(&patch, "Subject: [PATCH] change\n\ndiff --git a/x b/x\n").await?;
        Ok(vec![patch])
    }

    async fn snapshot(&self, ticket: &Ticket, _workspace: &Workspace) -> Result<StagedSnapshot> {
        Ok(StagedSnapshot {
            base: Some(self.base.clone()),
            git: GitSnapshot {
                git_base: Some("base0".to_string()),
                git_commit: ticket.git_commit.clone(),
                git_branch: ticket.git_branch.clone(),
                ..Default::default()
            },
        })
    }

    async fn release(&self, workspace: &Workspace) -> Result<()> {
        if workspace.isolated {
            self.record("release");
        }
        Ok(())
    }

    async fn cleanup_stale(&self) -> Result<usize> {
        self.record("cleanup");
        Ok(0)
    }
}

/// Keeps every `Pending` report it is shown.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    reports: Mutex<Vec<Report>>,
}

impl RecordingObserver {
    pub(crate) fn phases(&self) -> Vec<Option<PendingPhase>> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.pending_status)
            .collect()
    }

    pub(crate) fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunObserver for RecordingObserver {
    async fn pending(&self, _ticket: TicketId, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

/// A fixed ticket list.
#[derive(Default)]
pub(crate) struct FakeSource {
    pub(crate) tickets: Vec<Ticket>,
    pub(crate) trusted: Option<BTreeSet<String>>,
    pub(crate) offline: bool,
}

#[async_trait]
impl TicketSource for FakeSource {
    async fn open_tickets(&self) -> Result<Vec<Ticket>> {
        if self.offline {
            return Err(Error::Network("collector down".to_string()));
        }
        Ok(self.tickets.clone())
    }

    async fn ticket(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ticket #{id}")))
    }

    async fn trusted_authors(&self) -> Result<Option<BTreeSet<String>>> {
        Ok(self.trusted.clone())
    }
}
