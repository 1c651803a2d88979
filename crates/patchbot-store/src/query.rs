//! Which reports still say something about a ticket.

use chrono::{DateTime, TimeDelta, Utc};
use patchbot_core::{BaseVersion, MachineIdentity, Report, TicketFingerprint, TicketId};
use std::collections::HashSet;
use std::time::Duration;

/// Filter applied by [`current_reports`].
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    /// Keep reports made on this baseline.
    pub base: Option<BaseVersion>,
    /// Keep one report per machine, the most recent one.
    pub unique: bool,
    /// Also keep reports made on a newer baseline than `base`.
    pub newer: bool,
}

impl ReportQuery {
    pub fn on_base(base: BaseVersion) -> Self {
        Self {
            base: Some(base),
            ..Default::default()
        }
    }

    pub fn newer_than(base: BaseVersion) -> Self {
        Self {
            base: Some(base),
            newer: true,
            ..Default::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn base_ok(&self, report_base: Option<&BaseVersion>) -> bool {
        let Some(base) = &self.base else {
            return true;
        };
        match report_base {
            Some(report_base) => base == report_base || (self.newer && base <= report_base),
            None => false,
        }
    }
}

/// The reports comparable to the ticket's current fingerprint, oldest first.
///
/// The baseline pseudo-ticket has no commit of its own, so only the base
/// filter applies to it.
pub fn current_reports(
    ticket: TicketId,
    fingerprint: &TicketFingerprint,
    reports: &[Report],
    query: &ReportQuery,
) -> Vec<Report> {
    let mut matching: Vec<&Report> = reports
        .iter()
        .filter(|r| query.base_ok(r.base.as_ref()))
        .filter(|r| ticket.is_baseline() || r.fingerprint() == *fingerprint)
        .collect();
    matching.sort_by_key(|r| r.time);

    if query.unique {
        let mut seen = HashSet::new();
        let mut newest_first: Vec<&Report> = matching
            .into_iter()
            .rev()
            .filter(|r| seen.insert(&r.machine))
            .collect();
        newest_first.reverse();
        matching = newest_first;
    }

    matching.into_iter().cloned().collect()
}

/// Whether a report is an in-flight attempt that should be dropped.
pub fn is_stale_pending(
    report: &Report,
    machine: Option<&MachineIdentity>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    if !report.is_pending() {
        return false;
    }
    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
    machine.is_some_and(|m| report.machine == *m) || now.signed_duration_since(report.time) > timeout
}

/// Remove stale `Pending` reports in place. Returns how many were removed.
pub fn prune_pending(
    reports: &mut Vec<Report>,
    machine: Option<&MachineIdentity>,
    timeout: Duration,
    now: DateTime<Utc>,
) -> usize {
    let before = reports.len();
    reports.retain(|r| !is_stale_pending(r, machine, timeout, now));
    before - reports.len()
}
