//! Ticket records as served by the collector.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::report::Report;
use crate::{BaseVersion, TicketId};

/// Workflow status of a ticket on the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
    #[default]
    New,
    NeedsReview,
    PositiveReview,
    NeedsInfo,
    NeedsWork,
    Closed,
    Other(String),
}

impl TicketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::NeedsReview => "needs_review",
            TicketStatus::PositiveReview => "positive_review",
            TicketStatus::NeedsInfo => "needs_info",
            TicketStatus::NeedsWork => "needs_work",
            TicketStatus::Closed => "closed",
            TicketStatus::Other(s) => s,
        }
    }
}

impl From<String> for TicketStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new" => TicketStatus::New,
            "needs_review" => TicketStatus::NeedsReview,
            "positive_review" => TicketStatus::PositiveReview,
            "needs_info" => TicketStatus::NeedsInfo,
            "needs_work" => TicketStatus::NeedsWork,
            "closed" => TicketStatus::Closed,
            _ => TicketStatus::Other(s),
        }
    }
}

impl From<TicketStatus> for String {
    fn from(status: TicketStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry of a ticket's dependency list: another ticket, or a minimum
/// baseline version such as `sage-9.8`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    Ticket(TicketId),
    Version(String),
}

impl Dependency {
    /// The required baseline version, with any leading project prefix removed.
    pub fn version(&self) -> Option<BaseVersion> {
        match self {
            Dependency::Ticket(_) => None,
            Dependency::Version(raw) => {
                let trimmed = raw.trim_start_matches(|c: char| !c.is_ascii_digit());
                (!trimmed.is_empty()).then(|| BaseVersion::parse(trimmed))
            }
        }
    }
}

/// The attributes that decide whether two reports tested the same change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketFingerprint {
    pub commit: Option<String>,
    pub deps: Vec<Dependency>,
    pub spkgs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub milestone: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub authors_fullnames: Vec<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_repo: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub retry: bool,
    #[serde(default, deserialize_with = "deserialize_spkgs")]
    pub spkgs: Vec<String>,
    #[serde(default)]
    pub reports: Vec<Report>,
}

impl Ticket {
    /// The pseudo-ticket used to test the baseline on its own.
    pub fn baseline(base_branch: &str) -> Self {
        Self {
            id: TicketId::BASELINE,
            title: "base".to_string(),
            status: TicketStatus::NeedsReview,
            git_branch: Some(base_branch.to_string()),
            ..Default::default()
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.id.is_baseline()
    }

    pub fn has_branch(&self) -> bool {
        self.git_branch.as_deref().is_some_and(|b| !b.is_empty())
    }

    pub fn has_known_commit(&self) -> bool {
        self.git_commit
            .as_deref()
            .is_some_and(|c| !c.is_empty() && c != "unknown")
    }

    pub fn fingerprint(&self) -> TicketFingerprint {
        TicketFingerprint {
            commit: self.git_commit.clone(),
            deps: self.depends_on.clone(),
            spkgs: self.spkgs.clone(),
        }
    }
}

/// The collector sends `spkgs` either as a list or as a bare flag.
pub(crate) fn deserialize_spkgs<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Other(serde_json::Value),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Other(_) => Vec::new(),
    })
}
