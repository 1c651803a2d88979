//! Building reports from a run's progress.

use chrono::Utc;
use patchbot_config::WorkerConfig;
use patchbot_core::staging::StagedSnapshot;
use patchbot_core::{PendingPhase, PluginOutcome, Report, ReportStatus, Ticket};

/// Version string sent with every report.
pub const PATCHBOT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assembles the reports of one ticket run.
pub struct ReportBuilder<'a> {
    config: &'a WorkerConfig,
    ticket: &'a Ticket,
    snapshot: &'a StagedSnapshot,
    plugins: &'a [PluginOutcome],
}

impl<'a> ReportBuilder<'a> {
    pub fn new(
        config: &'a WorkerConfig,
        ticket: &'a Ticket,
        snapshot: &'a StagedSnapshot,
        plugins: &'a [PluginOutcome],
    ) -> Self {
        Self {
            config,
            ticket,
            snapshot,
            plugins,
        }
    }

    /// An intermediate report. `phase` is `None` before anything was staged.
    pub fn pending(&self, phase: Option<PendingPhase>) -> Report {
        self.build(ReportStatus::Pending, phase)
    }

    pub fn finish(&self, status: ReportStatus) -> Report {
        self.build(status, None)
    }

    fn build(&self, status: ReportStatus, pending_status: Option<PendingPhase>) -> Report {
        Report {
            status,
            deps: self.ticket.depends_on.clone(),
            spkgs: self.ticket.spkgs.clone(),
            base: self.snapshot.base.clone(),
            machine: self.config.machine.clone(),
            time: Utc::now(),
            plugins: self.plugins.to_vec(),
            pending_status,
            user: Some(self.config.user.clone()),
            owner: Some(self.config.owner.clone()),
            patchbot_version: Some(PATCHBOT_VERSION.to_string()),
            git: self.snapshot.git.clone(),
        }
    }
}
