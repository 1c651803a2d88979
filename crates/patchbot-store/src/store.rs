//! Report store trait.

use async_trait::async_trait;
use bytes::Bytes;
use patchbot_core::{MachineIdentity, Report, TicketId};
use std::time::Duration;

use crate::StoreResult;

/// What a pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub reports_removed: usize,
    /// Size of the log payloads released with the removed reports.
    pub bytes_freed: usize,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// All known reports of a ticket, oldest first.
    async fn reports(&self, ticket: TicketId) -> StoreResult<Vec<Report>>;

    /// Add a report with the plain-text run log, if any. A `Pending` report
    /// from the same machine is superseded.
    async fn append(&self, ticket: TicketId, report: Report, log: Option<Bytes>) -> StoreResult<()>;

    /// Remove `Pending` reports that belong to `machine` or are older than `timeout`.
    async fn prune_pending(
        &self,
        ticket: TicketId,
        machine: Option<&MachineIdentity>,
        timeout: Duration,
    ) -> StoreResult<PruneStats>;

    /// Replace the known reports of a ticket with a fresher view, such as the
    /// list attached to a ticket by the collector.
    async fn refresh(&self, ticket: TicketId, reports: Vec<Report>) -> StoreResult<()>;
}
