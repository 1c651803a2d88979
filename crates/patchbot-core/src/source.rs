//! Ticket source abstraction.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::{Result, Ticket, TicketId};

/// Where tickets come from.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// All open tickets, with their reports.
    async fn open_tickets(&self) -> Result<Vec<Ticket>>;

    /// One ticket by id, for targeted testing.
    async fn ticket(&self, id: TicketId) -> Result<Ticket>;

    /// Authors whose branches may be tested, if the source publishes such a list.
    async fn trusted_authors(&self) -> Result<Option<BTreeSet<String>>>;
}
