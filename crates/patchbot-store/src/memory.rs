//! In-memory report store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use patchbot_core::{MachineIdentity, Report, TicketId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::query::is_stale_pending;
use crate::{PruneStats, ReportStore, StoreResult};

/// A report together with its run log, if one was attached.
#[derive(Debug, Clone)]
pub struct StoredReport {
    pub report: Report,
    pub log: Option<Bytes>,
}

impl StoredReport {
    fn log_len(&self) -> usize {
        self.log.as_ref().map_or(0, Bytes::len)
    }

    fn same_attempt(&self, other: &Report) -> bool {
        self.report.machine == other.machine
            && self.report.time == other.time
            && self.report.status == other.status
    }
}

/// Report store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    tickets: RwLock<HashMap<TicketId, Vec<StoredReport>>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored for a ticket, logs included.
    pub async fn stored(&self, ticket: TicketId) -> Vec<StoredReport> {
        self.tickets
            .read()
            .await
            .get(&ticket)
            .cloned()
            .unwrap_or_default()
    }

    /// Total size of the log payloads held.
    pub async fn log_bytes(&self) -> usize {
        self.tickets
            .read()
            .await
            .values()
            .flatten()
            .map(StoredReport::log_len)
            .sum()
    }
}

fn prune(
    entries: &mut Vec<StoredReport>,
    machine: Option<&MachineIdentity>,
    timeout: Duration,
) -> PruneStats {
    let now = Utc::now();
    let mut stats = PruneStats::default();
    entries.retain(|entry| {
        let stale = is_stale_pending(&entry.report, machine, timeout, now);
        if stale {
            stats.reports_removed += 1;
            stats.bytes_freed += entry.log_len();
        }
        !stale
    });
    stats
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn reports(&self, ticket: TicketId) -> StoreResult<Vec<Report>> {
        let tickets = self.tickets.read().await;
        let mut reports: Vec<Report> = tickets
            .get(&ticket)
            .map(|entries| entries.iter().map(|e| e.report.clone()).collect())
            .unwrap_or_default();
        reports.sort_by_key(|r| r.time);
        Ok(reports)
    }

    async fn append(&self, ticket: TicketId, report: Report, log: Option<Bytes>) -> StoreResult<()> {
        let mut tickets = self.tickets.write().await;
        let entries = tickets.entry(ticket).or_default();

        // Supersedes this machine's pending reports only.
        let superseded = prune(entries, Some(&report.machine), Duration::MAX);
        if superseded.reports_removed > 0 {
            debug!(ticket = %ticket, removed = superseded.reports_removed, "Superseded pending reports");
        }

        entries.push(StoredReport { report, log });
        Ok(())
    }

    async fn prune_pending(
        &self,
        ticket: TicketId,
        machine: Option<&MachineIdentity>,
        timeout: Duration,
    ) -> StoreResult<PruneStats> {
        let mut tickets = self.tickets.write().await;
        let stats = tickets
            .get_mut(&ticket)
            .map(|entries| prune(entries, machine, timeout))
            .unwrap_or_default();
        if stats.reports_removed > 0 {
            debug!(
                ticket = %ticket,
                removed = stats.reports_removed,
                bytes_freed = stats.bytes_freed,
                "Pruned pending reports"
            );
        }
        Ok(stats)
    }

    async fn refresh(&self, ticket: TicketId, reports: Vec<Report>) -> StoreResult<()> {
        let mut tickets = self.tickets.write().await;
        let previous = tickets.remove(&ticket).unwrap_or_default();
        let refreshed = reports
            .into_iter()
            .map(|report| {
                let log = previous
                    .iter()
                    .find(|old| old.same_attempt(&report))
                    .and_then(|old| old.log.clone());
                StoredReport { report, log }
            })
            .collect();
        tickets.insert(ticket, refreshed);
        Ok(())
    }
}
