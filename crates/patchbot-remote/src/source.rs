//! Tickets served by the collector.

use async_trait::async_trait;
use patchbot_core::source::TicketSource;
use patchbot_core::{Result, Ticket, TicketId};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::PatchbotClient;

pub struct RemoteTicketSource {
    client: Arc<PatchbotClient>,
}

impl RemoteTicketSource {
    pub fn new(client: Arc<PatchbotClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TicketSource for RemoteTicketSource {
    async fn open_tickets(&self) -> Result<Vec<Ticket>> {
        Ok(self.client.open_tickets().await?)
    }

    async fn ticket(&self, id: TicketId) -> Result<Ticket> {
        Ok(self.client.ticket(id).await?)
    }

    async fn trusted_authors(&self) -> Result<Option<BTreeSet<String>>> {
        Ok(Some(self.client.trusted_authors().await?))
    }
}
