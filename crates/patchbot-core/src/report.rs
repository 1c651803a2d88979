//! Test reports.
//!
//! A report is the immutable record of one attempt at testing a ticket on
//! one machine. Intermediate `Pending` reports are superseded by later ones
//! from the same machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ticket::{TicketFingerprint, deserialize_spkgs};
use crate::{BaseVersion, Dependency, MachineIdentity};

/// Externally visible outcome of a run. The spelling is a wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReportStatus {
    ApplyFailed,
    BuildFailed,
    TestsFailed,
    TestsPassed,
    TestsPassedOnRetry,
    PluginFailed,
    PluginOnly,
    PluginOnlyFailed,
    Spkg,
    Pending,
    /// A status written by a newer worker.
    Unknown,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::ApplyFailed => "ApplyFailed",
            ReportStatus::BuildFailed => "BuildFailed",
            ReportStatus::TestsFailed => "TestsFailed",
            ReportStatus::TestsPassed => "TestsPassed",
            ReportStatus::TestsPassedOnRetry => "TestsPassedOnRetry",
            ReportStatus::PluginFailed => "PluginFailed",
            ReportStatus::PluginOnly => "PluginOnly",
            ReportStatus::PluginOnlyFailed => "PluginOnlyFailed",
            ReportStatus::Spkg => "Spkg",
            ReportStatus::Pending => "Pending",
            ReportStatus::Unknown => "Unknown",
        }
    }
}

impl From<String> for ReportStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ApplyFailed" => ReportStatus::ApplyFailed,
            "BuildFailed" => ReportStatus::BuildFailed,
            "TestsFailed" => ReportStatus::TestsFailed,
            "TestsPassed" => ReportStatus::TestsPassed,
            "TestsPassedOnRetry" => ReportStatus::TestsPassedOnRetry,
            "PluginFailed" => ReportStatus::PluginFailed,
            "PluginOnly" => ReportStatus::PluginOnly,
            "PluginOnlyFailed" => ReportStatus::PluginOnlyFailed,
            "Spkg" => ReportStatus::Spkg,
            "Pending" => ReportStatus::Pending,
            _ => ReportStatus::Unknown,
        }
    }
}

impl From<ReportStatus> for String {
    fn from(status: ReportStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which phase a `Pending` report was emitted after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingPhase {
    Applied,
    Built,
    PluginsPassed,
    PluginsFailed,
}

/// Result of one plugin, sent as a `[name, passed, data]` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(String, bool, Option<serde_json::Value>)",
    into = "(String, bool, Option<serde_json::Value>)"
)]
pub struct PluginOutcome {
    pub name: String,
    pub passed: bool,
    pub data: Option<serde_json::Value>,
}

impl From<(String, bool, Option<serde_json::Value>)> for PluginOutcome {
    fn from((name, passed, data): (String, bool, Option<serde_json::Value>)) -> Self {
        Self { name, passed, data }
    }
}

impl From<PluginOutcome> for (String, bool, Option<serde_json::Value>) {
    fn from(outcome: PluginOutcome) -> Self {
        (outcome.name, outcome.passed, outcome.data)
    }
}

/// Commits involved in a run, as recorded on the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_base_human: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_human: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_merge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_merge_human: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub status: ReportStatus,
    #[serde(default)]
    pub deps: Vec<Dependency>,
    #[serde(default, deserialize_with = "deserialize_spkgs")]
    pub spkgs: Vec<String>,
    #[serde(default)]
    pub base: Option<BaseVersion>,
    #[serde(default)]
    pub machine: MachineIdentity,
    #[serde(with = "report_time")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub plugins: Vec<PluginOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_status: Option<PendingPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patchbot_version: Option<String>,
    #[serde(flatten)]
    pub git: GitSnapshot,
}

impl Report {
    pub fn is_pending(&self) -> bool {
        self.status == ReportStatus::Pending
    }

    pub fn fingerprint(&self) -> TicketFingerprint {
        TicketFingerprint {
            commit: self.git.git_commit.clone(),
            deps: self.deps.clone(),
            spkgs: self.spkgs.clone(),
        }
    }
}

/// Report timestamps are naive UTC, `%Y-%m-%d %H:%M:%S`.
pub mod report_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn format(time: &DateTime<Utc>) -> String {
        time.format(FORMAT).to_string()
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        // Fractional seconds are ignored.
        let head = raw.get(..19).unwrap_or(raw);
        NaiveDateTime::parse_from_str(head, FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid report time: {raw}")))
    }
}
