//! The worker loop - selects tickets, runs them and reports the results.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use patchbot_config::{ConfigSource, WorkerConfig};
use patchbot_core::executor::Executor;
use patchbot_core::plugin::Plugin;
use patchbot_core::source::TicketSource;
use patchbot_core::staging::Staging;
use patchbot_core::{
    Cooldown, Error, ErrorClass, Report, ReportStatus, Result, SkipList, Ticket, TicketId,
    TicketStatus,
};
use patchbot_plugins::PluginRegistry;
use patchbot_store::{ReportQuery, ReportStore, current_reports};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::rating::{Rating, RatingContext, RatingEngine, summary_line};
use crate::run::{RunObserver, RunState, RunStateMachine};

/// What a call to [`Worker::run`] should do.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Test exactly these tickets, in order, instead of selecting.
    pub tickets: Vec<TicketId>,
    /// Stop after this many loop iterations.
    pub count: Option<usize>,
}

/// One ticket run, as seen by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub ticket: TicketId,
    pub state: RunState,
    pub status: Option<ReportStatus>,
}

/// Sends a run's `Pending` reports to the store as they come.
struct PendingReports {
    store: Arc<dyn ReportStore>,
}

#[async_trait]
impl RunObserver for PendingReports {
    async fn pending(&self, ticket: TicketId, report: Report) {
        if let Err(e) = self.store.append(ticket, report, None).await {
            warn!(ticket = %ticket, error = %e, "Could not report progress");
        }
    }
}

/// A worker that tests one ticket at a time.
pub struct Worker {
    source: Arc<dyn TicketSource>,
    store: Arc<dyn ReportStore>,
    staging: Arc<dyn Staging>,
    executor: Arc<dyn Executor>,
    registry: PluginRegistry,
    config: ConfigSource,
    rating: RatingEngine,
    skip: SkipList,
    /// The collector's trusted author list. Outer `None` until fetched.
    fetched_trusted: Option<Option<BTreeSet<String>>>,
    cancel: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        source: Arc<dyn TicketSource>,
        store: Arc<dyn ReportStore>,
        staging: Arc<dyn Staging>,
        executor: Arc<dyn Executor>,
        config: ConfigSource,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rating: RatingEngine::new(staging.clone()),
            source,
            store,
            staging,
            executor,
            registry: PluginRegistry::builtin(),
            config,
            skip: SkipList::new(),
            fetched_trusted: None,
            cancel,
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn skip_list(&self) -> &SkipList {
        &self.skip
    }

    /// Read the configuration and resolve its plugins.
    pub fn load_config(&self) -> Result<(WorkerConfig, Vec<Arc<dyn Plugin>>)> {
        let config = self.config.load()?;
        config.validate()?;
        let plugins = self.registry.select(
            &config.plugins.enabled,
            &config.plugins.disabled,
            config.plugin_only,
        )?;
        Ok((config, plugins))
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sleep unless a stop is requested first. Returns whether one was.
    async fn idle(&mut self, duration: Duration) -> bool {
        if self.cancelled() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            Ok(_) = self.cancel.wait_for(|stop| *stop) => true,
        }
    }

    /// Run the loop until the ticket list or the iteration count is exhausted,
    /// or a stop is requested. Configuration faults end it with an error.
    pub async fn run(&mut self, options: RunOptions) -> Result<Vec<RunRecord>> {
        let (config, plugins) = self.load_config()?;
        info!(machine = %config.machine, server = %config.server, root = %config.sage_root.display(), "Starting patchbot worker");

        let mut records = Vec::new();
        if !config.skip_base {
            records.extend(self.self_test(&config, &plugins).await?);
        }

        let mut targets: VecDeque<TicketId> = options.tickets.into();
        let targeted = !targets.is_empty();
        let mut iteration = 0;

        loop {
            if self.cancelled() {
                info!("Stop requested, exiting");
                break;
            }
            if options.count.is_some_and(|count| iteration >= count) {
                break;
            }
            if targeted && targets.is_empty() {
                break;
            }
            iteration += 1;

            let (config, plugins) = self.load_config()?;
            self.skip.purge_expired(Utc::now());

            if config.cleanup {
                if let Err(e) = self.staging.cleanup_stale().await {
                    warn!(error = %e, "Could not remove stale clones");
                }
            }

            if !config.time_of_day.is_open_now() {
                info!(window = %config.time_of_day.as_str(), "Outside the time-of-day window, idling");
                if self.idle(config.idle).await {
                    break;
                }
                continue;
            }

            if !config.skip_base {
                match self.staging.advance_base(&config.baseline_policy()).await {
                    Ok(advance) if advance.advanced => {
                        info!(only_in_upstream = advance.only_in_upstream, "Baseline advanced, testing it");
                        let record = self
                            .test_ticket(&config, &plugins, Ticket::baseline(&config.base_branch))
                            .await;
                        records.push(record);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Could not update the baseline");
                        if self.idle(config.idle).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let next = if targeted {
                match targets.pop_front() {
                    Some(id) => self.fetch(&config, id).await,
                    None => break,
                }
            } else {
                self.select(&config).await
            };

            match next {
                Some(ticket) => {
                    let record = self.test_ticket(&config, &plugins, ticket).await;
                    records.push(record);
                }
                None if targeted => {}
                None => {
                    info!(idle_secs = config.idle.as_secs(), "Nothing to test, idling");
                    if self.idle(config.idle).await {
                        break;
                    }
                }
            }
        }

        Ok(records)
    }

    /// Test the baseline unless this machine already passed it.
    async fn self_test(&mut self, config: &WorkerConfig, plugins: &[Arc<dyn Plugin>]) -> Result<Vec<RunRecord>> {
        if let Err(e) = self.staging.advance_base(&config.baseline_policy()).await {
            if e.class() != ErrorClass::TransientInfrastructure {
                return Err(e);
            }
            warn!(error = %e, "Could not update the baseline, testing the current one");
        }

        let base = self.staging.base_version().await?;
        let baseline = Ticket::baseline(&config.base_branch);
        let reports = self.store.reports(TicketId::BASELINE).await?;
        let passed = current_reports(
            TicketId::BASELINE,
            &baseline.fingerprint(),
            &reports,
            &ReportQuery::on_base(base.clone()),
        )
        .iter()
        .any(|r| r.machine == config.machine && r.status == ReportStatus::TestsPassed);

        if passed && !config.plugin_only {
            info!(base = %base, "Baseline already tested on this machine");
            return Ok(Vec::new());
        }

        let record = self.test_ticket(config, plugins, baseline).await;
        match record.status {
            Some(ReportStatus::TestsPassed | ReportStatus::PluginOnly) => Ok(vec![record]),
            status => {
                let status = status.map_or_else(|| record.state.to_string(), |s| s.to_string());
                error!(base = %base, status = %status, "Baseline self-test failed");
                Err(Error::Internal(format!("baseline {base} failed its self-test: {status}")))
            }
        }
    }

    async fn fetch(&mut self, config: &WorkerConfig, id: TicketId) -> Option<Ticket> {
        if id.is_baseline() {
            return Some(Ticket::baseline(&config.base_branch));
        }
        match self.source.ticket(id).await {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                warn!(ticket = %id, error = %e, "Could not fetch ticket");
                self.skip.skip(id, Cooldown::NETWORK, Utc::now());
                None
            }
        }
    }

    /// The best candidate, fetched afresh.
    async fn select(&mut self, config: &WorkerConfig) -> Option<Ticket> {
        let ranked = match self.rank(config).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "Could not rate the ticket list");
                return None;
            }
        };
        let (rating, best) = ranked.into_iter().next()?;
        info!(ticket = %best.id, rating = %rating, "Selected ticket");
        self.fetch(config, best.id).await
    }

    /// Candidate tickets with their ratings, best first.
    pub async fn rank(&mut self, config: &WorkerConfig) -> Result<Vec<(Rating, Ticket)>> {
        let tickets = self.source.open_tickets().await?;
        let trusted = self.trusted_authors(config).await;
        let base = self.staging.base_version().await?;

        let ctx = RatingContext {
            config,
            base: &base,
            trusted: trusted.as_ref(),
            skip: &self.skip,
            now: Utc::now(),
        };

        let mut rated = Vec::new();
        let mut unreachable = Vec::new();
        for ticket in tickets {
            let history = match self.history(config, &ticket).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(ticket = %ticket.id, error = %e, "Could not get report history");
                    unreachable.push(ticket.id);
                    continue;
                }
            };
            match self.rating.rate(&ticket, &history, &ctx).await {
                Ok(rating) => {
                    info!(ticket = %ticket.id, "{}", summary_line(&ticket, &rating));
                    rated.push((rating, ticket));
                }
                Err(rejection) => {
                    debug!(ticket = %ticket.id, reason = %rejection, "Not a candidate");
                }
            }
        }
        for id in unreachable {
            self.skip.skip(id, Cooldown::NETWORK, Utc::now());
        }
        rated.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rated)
    }

    /// Reports of `ticket` that still matter, with stale pending ones dropped.
    async fn history(&self, config: &WorkerConfig, ticket: &Ticket) -> Result<Vec<Report>> {
        if !ticket.reports.is_empty() {
            self.store.refresh(ticket.id, ticket.reports.clone()).await?;
        }
        self.store
            .prune_pending(ticket.id, Some(&config.machine), config.pending_timeout)
            .await?;
        Ok(self.store.reports(ticket.id).await?)
    }

    async fn trusted_authors(&mut self, config: &WorkerConfig) -> Option<BTreeSet<String>> {
        if config.trusted_authors.is_none() && self.fetched_trusted.is_none() {
            match self.source.trusted_authors().await {
                Ok(list) => self.fetched_trusted = Some(list),
                Err(e) => warn!(error = %e, "Could not get the trusted author list"),
            }
        }
        config.trusted_authors_with(self.fetched_trusted.as_ref().and_then(Option::as_ref))
    }

    async fn test_ticket(&mut self, config: &WorkerConfig, plugins: &[Arc<dyn Plugin>], ticket: Ticket) -> RunRecord {
        let id = ticket.id;
        if ticket.status == TicketStatus::Closed {
            info!(ticket = %id, "Ticket is closed, skipping");
            self.skip.skip(id, Cooldown::CLOSED, Utc::now());
            return RunRecord {
                ticket: id,
                state: RunState::Skipped,
                status: None,
            };
        }

        if let Err(e) = self
            .store
            .prune_pending(id, Some(&config.machine), config.pending_timeout)
            .await
        {
            warn!(ticket = %id, error = %e, "Could not prune pending reports");
        }

        let observer = PendingReports {
            store: self.store.clone(),
        };
        let machine = RunStateMachine::new(self.staging.clone(), self.executor.clone(), plugins.to_vec());
        let outcome = machine.run(&ticket, config, &observer).await;

        if let Some(cooldown) = outcome.cooldown {
            debug!(ticket = %id, cooldown = ?cooldown, "Skipping ticket for a while");
            self.skip.skip(id, cooldown, Utc::now());
        }

        if let Some(report) = &outcome.report {
            if config.dry_run {
                info!(ticket = %id, status = %report.status, "Dry run, not reporting #{id}");
            } else {
                self.submit(config, id, report, &outcome.log).await;
            }
        }

        if let Some(workspace) = &outcome.workspace {
            if let Err(e) = self.staging.release(workspace).await {
                warn!(ticket = %id, error = %e, "Could not release workspace");
            }
        }

        RunRecord {
            ticket: id,
            status: outcome.status(),
            state: outcome.state,
        }
    }

    /// Submit the final report with its log, retrying a bounded number of times.
    async fn submit(&self, config: &WorkerConfig, id: TicketId, report: &Report, log: &Path) {
        let log = match tokio::fs::read(log).await {
            Ok(raw) => Some(Bytes::from(raw)),
            Err(e) => {
                warn!(ticket = %id, path = %log.display(), error = %e, "Could not read ticket log");
                None
            }
        };

        info!(ticket = %id, status = %report.status, "Reporting #{id} with status {}", report.status);
        let attempts = config.submit_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.append(id, report.clone(), log.clone()).await {
                Ok(()) => {
                    info!(ticket = %id, attempt, "Report submitted");
                    return;
                }
                Err(e) => {
                    warn!(ticket = %id, attempt, attempts, error = %e, "Error reporting");
                    if attempt < attempts {
                        tokio::time::sleep(config.idle).await;
                    }
                }
            }
        }
        error!(ticket = %id, attempts, "Giving up reporting #{id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, FakeStaging, ScriptedExecutor, StageBehaviour, machine, report, ticket};
    use patchbot_config::ConfigOverrides;
    use patchbot_store::{MemoryReportStore, PruneStats, StoreError, StoreResult};
    use patchbot_core::{MachineIdentity, PendingPhase};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const CONFIG: &str = r#"
idle 0
machine "Ubuntu" "22.04" "x86_64" "5.15.0" "testbox"
make "make"
parallelism 2
"#;

    struct Harness {
        dir: TempDir,
        source: FakeSource,
        staging: FakeStaging,
        executor: ScriptedExecutor,
        store: Arc<MemoryReportStore>,
        extra_config: String,
    }

    struct Running {
        worker: Worker,
        staging: Arc<FakeStaging>,
        executor: Arc<ScriptedExecutor>,
        store: Arc<MemoryReportStore>,
        stop: watch::Sender<bool>,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("sage"), "#!/bin/sh\n").unwrap();
            Self {
                staging: FakeStaging::new(dir.path()),
                source: FakeSource::default(),
                executor: ScriptedExecutor::new(),
                store: Arc::new(MemoryReportStore::new()),
                extra_config: String::new(),
                dir,
            }
        }

        fn config(mut self, extra: &str) -> Self {
            self.extra_config.push_str(extra);
            self.extra_config.push('\n');
            self
        }

        fn tickets(mut self, tickets: Vec<Ticket>) -> Self {
            self.source.tickets = tickets;
            self
        }

        fn start(self) -> Running {
            let path = self.dir.path().join("patchbot.kdl");
            let kdl = format!(
                "sage-root \"{}\"\nlog-dir \"{}\"\n{CONFIG}{}",
                self.dir.path().display(),
                self.dir.path().join("logs").display(),
                self.extra_config
            );
            std::fs::write(&path, kdl).unwrap();

            let staging = Arc::new(self.staging);
            let executor = Arc::new(self.executor);
            let (stop, cancel) = watch::channel(false);
            let worker = Worker::new(
                Arc::new(self.source),
                self.store.clone(),
                staging.clone(),
                executor.clone(),
                ConfigSource::new(Some(path), ConfigOverrides::default()),
                cancel,
            )
            .with_registry(PluginRegistry::new(Vec::new()));
            Running {
                worker,
                staging,
                executor,
                store: self.store,
                stop,
                _dir: self.dir,
            }
        }
    }

    fn once() -> RunOptions {
        RunOptions {
            tickets: Vec::new(),
            count: Some(1),
        }
    }

    #[tokio::test]
    async fn test_self_test_then_best_ticket() {
        let mut running = Harness::new()
            .tickets(vec![
                ticket(20, TicketStatus::PositiveReview),
                ticket(21, TicketStatus::NeedsReview),
            ])
            .start();

        let records = running.worker.run(once()).await.unwrap();
        let tested: Vec<TicketId> = records.iter().map(|r| r.ticket).collect();
        assert_eq!(tested, vec![TicketId::BASELINE, TicketId::new(21)]);
        assert!(records.iter().all(|r| r.status == Some(ReportStatus::TestsPassed)));

        let stored = running.store.stored(TicketId::new(21)).await;
        // Pending reports are superseded by the final one.
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].report.status, ReportStatus::TestsPassed);
        let log = String::from_utf8(stored[0].log.clone().unwrap().to_vec()).unwrap();
        assert!(log.starts_with("Testing #21"));
    }

    #[tokio::test]
    async fn test_self_test_skipped_when_already_passed() {
        let harness = Harness::new();
        let base = Ticket::baseline("develop");
        let passed = report(&base, ReportStatus::TestsPassed, machine(), "9.8", "base0");
        harness
            .store
            .append(TicketId::BASELINE, passed, None)
            .await
            .unwrap();

        let mut running = harness.start();
        let records = running.worker.run(RunOptions { tickets: Vec::new(), count: Some(0) }).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(running.staging.called("stage #0"), 0);
    }

    #[tokio::test]
    async fn test_failed_self_test_is_fatal() {
        let mut harness = Harness::new();
        harness.executor = ScriptedExecutor::new().fail("make build");
        let mut running = harness.start();

        let err = running.worker.run(once()).await.unwrap_err();
        assert!(matches!(err, Error::Internal(msg) if msg.contains("BuildFailed")));
    }

    #[tokio::test]
    async fn test_skip_base() {
        let mut running = Harness::new()
            .config("skip-base #true")
            .tickets(vec![ticket(22, TicketStatus::NeedsReview)])
            .start();

        let records = running.worker.run(once()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticket, TicketId::new(22));
        assert_eq!(running.staging.called("advance"), 0);
    }

    #[tokio::test]
    async fn test_baseline_advance_retests_baseline() {
        let mut harness = Harness::new().tickets(vec![ticket(23, TicketStatus::NeedsReview)]);
        harness.staging = FakeStaging::new(harness.dir.path()).with_advances(&[false, true]);
        let mut running = harness.start();

        let records = running.worker.run(RunOptions { tickets: Vec::new(), count: Some(2) }).await.unwrap();
        let tested: Vec<TicketId> = records.iter().map(|r| r.ticket).collect();
        assert_eq!(
            tested,
            vec![TicketId::BASELINE, TicketId::BASELINE, TicketId::new(23)]
        );
    }

    #[tokio::test]
    async fn test_covered_ticket_is_not_retested() {
        let mut harness = Harness::new()
            .config("skip-base #true")
            .tickets(vec![ticket(24, TicketStatus::NeedsReview)]);
        harness.staging = FakeStaging::new(harness.dir.path()).with_behind("base0", 0);
        let mut running = harness.start();

        let records = running.worker.run(RunOptions { tickets: Vec::new(), count: Some(2) }).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(running.staging.called("stage #24"), 1);
    }

    #[tokio::test]
    async fn test_failure_cooldown() {
        let mut harness = Harness::new()
            .config("skip-base #true")
            .tickets(vec![ticket(25, TicketStatus::NeedsReview)]);
        harness.staging = FakeStaging::new(harness.dir.path()).with_behaviour(StageBehaviour::Unreachable);
        let mut running = harness.start();

        let records = running.worker.run(RunOptions { tickets: Vec::new(), count: Some(2) }).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, RunState::NetworkError);
        assert!(running.worker.skip_list().contains(TicketId::new(25), Utc::now()));
        // Only the pending report sent before staging is left.
        assert!(running.store.stored(TicketId::new(25)).await.iter().all(|s| s.report.is_pending()));
    }

    #[tokio::test]
    async fn test_targeted_tickets_and_closed_guard() {
        let mut running = Harness::new()
            .config("skip-base #true")
            .tickets(vec![ticket(26, TicketStatus::NeedsWork), ticket(27, TicketStatus::Closed)])
            .start();

        let records = running
            .worker
            .run(RunOptions {
                tickets: vec![TicketId::new(27), TicketId::new(26), TicketId::new(99)],
                count: None,
            })
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, RunState::Skipped);
        assert_eq!(records[1].status, Some(ReportStatus::TestsPassed));
        assert_eq!(running.staging.called("stage #27"), 0);
        let skip = running.worker.skip_list();
        assert!(skip.contains(TicketId::new(27), Utc::now()));
        assert!(skip.contains(TicketId::new(99), Utc::now()));
    }

    #[tokio::test]
    async fn test_dry_run_only_sends_pending_reports() {
        let mut running = Harness::new()
            .config("skip-base #true\ndry-run #true")
            .tickets(vec![ticket(28, TicketStatus::NeedsReview)])
            .start();

        running.worker.run(once()).await.unwrap();
        let stored = running.store.stored(TicketId::new(28)).await;
        assert!(!stored.is_empty());
        assert!(stored.iter().all(|s| s.report.is_pending()));
        assert_eq!(stored.last().unwrap().report.pending_status, Some(PendingPhase::PluginsPassed));
        assert!(running.executor.ran("src/sage/misc/a*.py"));
    }

    #[tokio::test]
    async fn test_cleanup_each_iteration() {
        let mut running = Harness::new().config("skip-base #true\ncleanup #true").start();
        running.worker.run(RunOptions { tickets: Vec::new(), count: Some(2) }).await.unwrap();
        assert_eq!(running.staging.called("cleanup"), 2);
    }

    #[tokio::test]
    async fn test_rank_orders_candidates() {
        let mut harness = Harness::new().tickets(vec![
            ticket(30, TicketStatus::PositiveReview),
            ticket(31, TicketStatus::NeedsReview),
            ticket(32, TicketStatus::NeedsInfo),
            ticket(33, TicketStatus::New),
        ]);
        harness.source.trusted = Some(["alice".to_string()].into());
        let mut running = harness.start();

        let (config, _) = running.worker.load_config().unwrap();
        let ranked = running.worker.rank(&config).await.unwrap();
        let ids: Vec<u64> = ranked.iter().map(|(_, t)| t.id.get()).collect();
        assert_eq!(ids, vec![31, 30, 32]);
    }

    #[tokio::test]
    async fn test_untrusted_authors_are_not_ranked() {
        let mut harness = Harness::new().tickets(vec![ticket(34, TicketStatus::NeedsReview)]);
        harness.source.trusted = Some(["bob".to_string()].into());
        let mut running = harness.start();

        let (config, _) = running.worker.load_config().unwrap();
        assert!(running.worker.rank(&config).await.unwrap().is_empty());

        // Configured extras widen the fetched list.
        let mut config = config;
        config.extra_trusted_authors.insert("alice".to_string());
        assert_eq!(running.worker.rank(&config).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_own_pending_reports_are_dropped_before_rating() {
        let t = ticket(35, TicketStatus::NeedsReview);
        let pending = report(&t, ReportStatus::Pending, machine(), "9.8", "base0");
        let mut running = Harness::new().tickets(vec![t.clone()]).start();
        running.store.append(t.id, pending, None).await.unwrap();

        // A pending report from this machine is a crashed run and is dropped.
        let (config, _) = running.worker.load_config().unwrap();
        let ranked = running.worker.rank(&config).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert!(running.store.stored(t.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_request_while_idle() {
        let mut harness = Harness::new().config("skip-base #true\nidle 3600");
        harness.source.offline = true;
        let Running {
            mut worker,
            stop,
            _dir,
            ..
        } = harness.start();

        let handle = tokio::spawn(async move { worker.run(RunOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(true).unwrap();

        let records = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(records.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_fatal() {
        let mut running = Harness::new()
            .config("plugins {\n    enable \"coverage\"\n}")
            .start();
        let err = running.worker.run(once()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::ConfigurationFault);
    }

    /// Rejects the first few final reports.
    struct FlakyStore {
        inner: MemoryReportStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ReportStore for FlakyStore {
        async fn reports(&self, ticket: TicketId) -> StoreResult<Vec<Report>> {
            self.inner.reports(ticket).await
        }

        async fn append(&self, ticket: TicketId, report: Report, log: Option<Bytes>) -> StoreResult<()> {
            if !report.is_pending() && self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("collector busy".to_string()));
            }
            self.inner.append(ticket, report, log).await
        }

        async fn prune_pending(
            &self,
            ticket: TicketId,
            machine: Option<&MachineIdentity>,
            timeout: Duration,
        ) -> StoreResult<PruneStats> {
            self.inner.prune_pending(ticket, machine, timeout).await
        }

        async fn refresh(&self, ticket: TicketId, reports: Vec<Report>) -> StoreResult<()> {
            self.inner.refresh(ticket, reports).await
        }
    }

    async fn run_with_flaky_store(failures: usize) -> Vec<Report> {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sage"), "#!/bin/sh\n").unwrap();
        let path = dir.path().join("patchbot.kdl");
        std::fs::write(
            &path,
            format!(
                "sage-root \"{}\"\nlog-dir \"{}\"\nskip-base #true\nsubmit-attempts 3\n{CONFIG}",
                dir.path().display(),
                dir.path().join("logs").display()
            ),
        )
        .unwrap();

        let store = Arc::new(FlakyStore {
            inner: MemoryReportStore::new(),
            failures: AtomicUsize::new(failures),
        });
        let (_stop, cancel) = watch::channel(false);
        let mut worker = Worker::new(
            Arc::new(FakeSource {
                tickets: vec![ticket(40, TicketStatus::NeedsReview)],
                ..Default::default()
            }),
            store.clone(),
            Arc::new(FakeStaging::new(dir.path())),
            Arc::new(ScriptedExecutor::new()),
            ConfigSource::new(Some(path), ConfigOverrides::default()),
            cancel,
        )
        .with_registry(PluginRegistry::new(Vec::new()));
        worker.run(once()).await.unwrap();
        store.inner.reports(TicketId::new(40)).await.unwrap()
    }

    #[tokio::test]
    async fn test_submission_is_retried() {
        let reports = run_with_flaky_store(2).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, ReportStatus::TestsPassed);
    }

    #[tokio::test]
    async fn test_submission_failure_does_not_crash_the_loop() {
        let reports = run_with_flaky_store(5).await;
        // Only the last pending report is left.
        assert!(reports.iter().all(Report::is_pending));
    }

    /// Report history of one ticket cannot be fetched.
    struct PartlyUnreachableStore {
        inner: MemoryReportStore,
        unreachable: TicketId,
    }

    #[async_trait]
    impl ReportStore for PartlyUnreachableStore {
        async fn reports(&self, ticket: TicketId) -> StoreResult<Vec<Report>> {
            if ticket == self.unreachable {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.reports(ticket).await
        }

        async fn append(&self, ticket: TicketId, report: Report, log: Option<Bytes>) -> StoreResult<()> {
            self.inner.append(ticket, report, log).await
        }

        async fn prune_pending(
            &self,
            ticket: TicketId,
            machine: Option<&MachineIdentity>,
            timeout: Duration,
        ) -> StoreResult<PruneStats> {
            self.inner.prune_pending(ticket, machine, timeout).await
        }

        async fn refresh(&self, ticket: TicketId, reports: Vec<Report>) -> StoreResult<()> {
            self.inner.refresh(ticket, reports).await
        }
    }

    #[tokio::test]
    async fn test_unreachable_history_skips_only_that_ticket() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sage"), "#!/bin/sh\n").unwrap();
        let path = dir.path().join("patchbot.kdl");
        std::fs::write(
            &path,
            format!(
                "sage-root \"{}\"\nlog-dir \"{}\"\nskip-base #true\n{CONFIG}",
                dir.path().display(),
                dir.path().join("logs").display()
            ),
        )
        .unwrap();

        let store = Arc::new(PartlyUnreachableStore {
            inner: MemoryReportStore::new(),
            unreachable: TicketId::new(41),
        });
        let (_stop, cancel) = watch::channel(false);
        let mut worker = Worker::new(
            Arc::new(FakeSource {
                tickets: vec![
                    ticket(40, TicketStatus::NeedsReview),
                    ticket(41, TicketStatus::PositiveReview),
                ],
                ..Default::default()
            }),
            store.clone(),
            Arc::new(FakeStaging::new(dir.path())),
            Arc::new(ScriptedExecutor::new()),
            ConfigSource::new(Some(path), ConfigOverrides::default()),
            cancel,
        )
        .with_registry(PluginRegistry::new(Vec::new()));

        let (config, _) = worker.load_config().unwrap();
        let ranked = worker.rank(&config).await.unwrap();
        let ids: Vec<TicketId> = ranked.iter().map(|(_, t)| t.id).collect();
        assert_eq!(ids, vec![TicketId::new(40)]);
        assert!(worker.skip_list().contains(TicketId::new(41), Utc::now()));

        let records = worker.run(once()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticket, TicketId::new(40));
        assert_eq!(records[0].status, Some(ReportStatus::TestsPassed));
    }
}
