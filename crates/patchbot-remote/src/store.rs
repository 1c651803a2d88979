//! Report store backed by the collector.
//!
//! Submissions go straight to the collector. Reads are answered from the
//! reports that arrived with the latest ticket records, which the worker
//! hands over through [`ReportStore::refresh`]; a ticket never refreshed is
//! fetched on first use.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use patchbot_core::{MachineIdentity, Report, TicketId};
use patchbot_store::{PruneStats, ReportStore, StoreResult, prune_pending};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::PatchbotClient;

pub struct RemoteReportStore {
    client: Arc<PatchbotClient>,
    cache: RwLock<HashMap<TicketId, Vec<Report>>>,
}

impl RemoteReportStore {
    pub fn new(client: Arc<PatchbotClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReportStore for RemoteReportStore {
    async fn reports(&self, ticket: TicketId) -> StoreResult<Vec<Report>> {
        if let Some(reports) = self.cache.read().await.get(&ticket) {
            return Ok(reports.clone());
        }
        let mut reports = self.client.ticket(ticket).await?.reports;
        reports.sort_by_key(|r| r.time);
        self.cache.write().await.insert(ticket, reports.clone());
        Ok(reports)
    }

    async fn append(&self, ticket: TicketId, report: Report, log: Option<Bytes>) -> StoreResult<()> {
        if !report.is_pending() {
            info!(ticket = %ticket, status = %report.status, "Submitting report");
        }
        self.client
            .submit_report(ticket, &report, log.as_deref())
            .await?;

        let mut cache = self.cache.write().await;
        let reports = cache.entry(ticket).or_default();
        prune_pending(reports, Some(&report.machine), Duration::MAX, Utc::now());
        reports.push(report);
        Ok(())
    }

    async fn prune_pending(
        &self,
        ticket: TicketId,
        machine: Option<&MachineIdentity>,
        timeout: Duration,
    ) -> StoreResult<PruneStats> {
        let mut cache = self.cache.write().await;
        let removed = cache
            .get_mut(&ticket)
            .map(|reports| prune_pending(reports, machine, timeout, Utc::now()))
            .unwrap_or_default();
        if removed > 0 {
            debug!(ticket = %ticket, removed, "Pruned pending reports");
        }
        // Logs live on the collector.
        Ok(PruneStats {
            reports_removed: removed,
            bytes_freed: 0,
        })
    }

    async fn refresh(&self, ticket: TicketId, mut reports: Vec<Report>) -> StoreResult<()> {
        reports.sort_by_key(|r| r.time);
        self.cache.write().await.insert(ticket, reports);
        Ok(())
    }
}
