//! Ticket rating.
//!
//! A rating orders candidate tickets. Tickets whose recent reports come from
//! machines unlike this one are worth more, ties on that go to the higher
//! bonus score and then to the lower ticket id.

use chrono::{DateTime, Utc};
use patchbot_config::WorkerConfig;
use patchbot_core::staging::Staging;
use patchbot_core::{BaseVersion, Report, ReportStatus, SkipList, Ticket};
use patchbot_store::{ReportQuery, current_reports};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Why a ticket is not a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedPackages,
    NoBranch,
    Status(String),
    Milestone(String),
    UnknownCommit,
    DependencyAhead(BaseVersion),
    NoAuthor,
    UntrustedAuthor(String),
    Skipped,
    AlreadyCovered,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnsupportedPackages => f.write_str("needs packages this worker cannot test"),
            Rejection::NoBranch => f.write_str("no git branch"),
            Rejection::Status(status) => write!(f, "status {status}"),
            Rejection::Milestone(milestone) => write!(f, "milestone {milestone}"),
            Rejection::UnknownCommit => f.write_str("unknown commit"),
            Rejection::DependencyAhead(version) => write!(f, "depends on {version}"),
            Rejection::NoAuthor => f.write_str("no author"),
            Rejection::UntrustedAuthor(author) => write!(f, "untrusted author {author}"),
            Rejection::Skipped => f.write_str("in the skip list"),
            Rejection::AlreadyCovered => f.write_str("already tested on this machine"),
        }
    }
}

/// Compared lexicographically: uniqueness, then score, then tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rating {
    /// How this machine differs from the most similar current report, one
    /// flag per machine component. The most similar report is the smallest
    /// difference vector in lexicographic order.
    pub uniqueness: Vec<bool>,
    pub score: i64,
    /// The negated ticket id.
    pub tie_break: i64,
}

impl Rating {
    fn fully_unique(depth: usize) -> Vec<bool> {
        vec![true; depth + 1]
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = self
            .uniqueness
            .iter()
            .map(|u| if *u { "1" } else { "0" })
            .collect();
        write!(f, "(({}), {})", flags.join(", "), self.score)
    }
}

/// One line of the rating table.
pub fn summary_line(ticket: &Ticket, rating: &Rating) -> String {
    format!("#{:<6} {}  {}", ticket.id.get(), rating, ticket.title)
}

/// What a rating pass looks at besides the ticket itself.
pub struct RatingContext<'a> {
    pub config: &'a WorkerConfig,
    /// Version of the current baseline.
    pub base: &'a BaseVersion,
    pub trusted: Option<&'a BTreeSet<String>>,
    pub skip: &'a SkipList,
    pub now: DateTime<Utc>,
}

pub struct RatingEngine {
    staging: Arc<dyn Staging>,
}

impl RatingEngine {
    pub fn new(staging: Arc<dyn Staging>) -> Self {
        Self { staging }
    }

    /// Checks that do not depend on the report history.
    pub fn check(&self, ticket: &Ticket, ctx: &RatingContext<'_>) -> Result<(), Rejection> {
        let config = ctx.config;
        if !ticket.spkgs.is_empty() {
            return Err(Rejection::UnsupportedPackages);
        }
        if !ticket.has_branch() {
            return Err(Rejection::NoBranch);
        }
        let status = ticket.status.as_str();
        if !config.statuses.iter().any(|s| s == status) {
            return Err(Rejection::Status(status.to_string()));
        }
        if config.excluded_milestones.contains(&ticket.milestone) {
            return Err(Rejection::Milestone(ticket.milestone.clone()));
        }
        if !ticket.has_known_commit() {
            return Err(Rejection::UnknownCommit);
        }
        if let Some(version) = ticket
            .depends_on
            .iter()
            .filter_map(|dep| dep.version())
            .find(|version| version > ctx.base)
        {
            return Err(Rejection::DependencyAhead(version));
        }
        // The trusted list holds full names. Collectors that send none are
        // checked by login.
        let authors = if ticket.authors_fullnames.is_empty() {
            &ticket.authors
        } else {
            &ticket.authors_fullnames
        };
        if authors.is_empty() {
            return Err(Rejection::NoAuthor);
        }
        if let Some(trusted) = ctx.trusted {
            if let Some(author) = authors.iter().find(|a| !trusted.contains(*a)) {
                return Err(Rejection::UntrustedAuthor(author.clone()));
            }
        }
        if ctx.skip.contains(ticket.id, ctx.now) {
            return Err(Rejection::Skipped);
        }
        Ok(())
    }

    /// Rate `ticket` given its known reports.
    pub async fn rate(
        &self,
        ticket: &Ticket,
        history: &[Report],
        ctx: &RatingContext<'_>,
    ) -> Result<Rating, Rejection> {
        let config = ctx.config;
        let depth = config.machine_match;

        // The baseline is retested whenever it is due.
        if ticket.is_baseline() {
            return Ok(Rating {
                uniqueness: Rating::fully_unique(depth),
                score: i64::MAX,
                tie_break: 0,
            });
        }

        self.check(ticket, ctx)?;

        let bonus = &config.bonus;
        let mut score: i64 = 0;

        for author in ticket.authors.iter().chain(&ticket.authors_fullnames) {
            let value = bonus.get(author).saturating_mul(2);
            if value != 0 {
                debug!(ticket = %ticket.id, author = %author, value, "Author bonus");
            }
            score = score.saturating_add(value);
        }
        for participant in &ticket.participants {
            let value = bonus.get(participant);
            if value != 0 {
                debug!(ticket = %ticket.id, participant = %participant, value, "Participant bonus");
            }
            score = score.saturating_add(value);
        }

        let id = ticket.id.to_string();
        for key in [
            ticket.component.as_str(),
            ticket.status.as_str(),
            ticket.priority.as_str(),
            id.as_str(),
        ] {
            let value = bonus.get(key);
            if value != 0 {
                debug!(ticket = %ticket.id, key, value, "Bonus");
            }
            score = score.saturating_add(value);
        }

        let mut uniqueness = Rating::fully_unique(depth);

        if ticket.retry {
            debug!(ticket = %ticket.id, "Retry requested, ignoring previous reports");
        } else {
            let query = ReportQuery::newer_than(ctx.base.clone());
            for report in current_reports(ticket.id, &ticket.fingerprint(), history, &query) {
                let behind = self.behind(ticket, &report).await;
                if let Some(commits) = behind {
                    let penalty = bonus
                        .get("behind")
                        .saturating_mul(i64::try_from(commits).unwrap_or(i64::MAX));
                    debug!(ticket = %ticket.id, commits, penalty, "Report base is behind");
                    score = score.saturating_sub(penalty);
                }
                if report.status != ReportStatus::ApplyFailed {
                    score = score.saturating_add(bonus.get("applies"));
                }
                score = score.saturating_sub(bonus.get("unique"));

                let mut diff = config.machine.compare(&report.machine, depth);
                // A report on an older base does not cover the current one.
                let stale = behind != Some(0);
                if stale && config.stale_base_uniqueness && diff.iter().all(|d| !d) {
                    match diff.last_mut() {
                        Some(last) => *last = true,
                        None => diff.push(true),
                    }
                }
                debug!(ticket = %ticket.id, machine = %report.machine, diff = ?diff, status = %report.status, "Compared report");
                uniqueness = uniqueness.min(diff);
            }
        }

        if uniqueness.iter().all(|u| !u) {
            return Err(Rejection::AlreadyCovered);
        }

        Ok(Rating {
            uniqueness,
            score,
            tie_break: -i64::try_from(ticket.id.get()).unwrap_or(i64::MAX),
        })
    }

    /// Commits between the report's base and the current one. `None` when unknown.
    async fn behind(&self, ticket: &Ticket, report: &Report) -> Option<u64> {
        let commit = report.git.git_base.as_deref()?;
        match self.staging.commits_behind(commit).await {
            Ok(commits) => Some(commits),
            Err(e) => {
                debug!(ticket = %ticket.id, commit, error = %e, "Could not measure report base");
                None
            }
        }
    }
}
