//! Per-ticket cooldowns.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use crate::TicketId;

/// How long a ticket stays out of selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    For(Duration),
    Indefinitely,
}

impl Cooldown {
    pub const NETWORK: Cooldown = Cooldown::For(Duration::from_secs(60 * 60));
    pub const DEFECT: Cooldown = Cooldown::For(Duration::from_secs(12 * 60 * 60));
    pub const CLOSED: Cooldown = Cooldown::For(Duration::from_secs(120 * 60 * 60));

    pub fn from_secs(secs: Option<u64>) -> Self {
        match secs {
            Some(secs) => Cooldown::For(Duration::from_secs(secs)),
            None => Cooldown::Indefinitely,
        }
    }
}

/// Tickets that must not be selected before a given instant.
///
/// `None` as the deadline means the entry never expires on its own.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    entries: HashMap<TicketId, Option<DateTime<Utc>>>,
}

impl SkipList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(&mut self, ticket: TicketId, cooldown: Cooldown, now: DateTime<Utc>) {
        let until = match cooldown {
            Cooldown::For(duration) => chrono::Duration::from_std(duration)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
            Cooldown::Indefinitely => None,
        };
        self.entries.insert(ticket, until);
    }

    pub fn contains(&self, ticket: TicketId, now: DateTime<Utc>) -> bool {
        match self.entries.get(&ticket) {
            Some(Some(until)) => *until > now,
            Some(None) => true,
            None => false,
        }
    }

    /// Drop entries whose deadline has passed. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, until| until.map_or(true, |until| until > now));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TicketId, Option<DateTime<Utc>>)> + '_ {
        self.entries.iter().map(|(id, until)| (*id, *until))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
