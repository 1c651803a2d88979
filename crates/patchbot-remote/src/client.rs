//! HTTP client for the collector.

use bzip2::Compression;
use bzip2::write::BzEncoder;
use patchbot_core::{Report, Ticket, TicketId};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::{ClientError, ClientResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Attempts made for the ticket list and the trusted author list.
const LIST_ATTEMPTS: u32 = 10;
/// Attempts made for a single ticket.
const TICKET_ATTEMPTS: u32 = 3;

/// The collector's HTTP API.
#[derive(Debug, Clone)]
pub struct PatchbotClient {
    http: reqwest::Client,
    server: Url,
    retry_delay: Duration,
}

impl PatchbotClient {
    pub fn new(server: &str) -> ClientResult<Self> {
        let server = Url::parse(server)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("patchbot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            server,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Pause between failed attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.server.as_str().trim_end_matches('/'), path)
    }

    async fn get_once(&self, url: &str) -> ClientResult<Value> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }
        Ok(response.json().await?)
    }

    /// GET a JSON document, retrying up to `attempts` times.
    pub async fn get_json(&self, path: &str, attempts: u32) -> ClientResult<Value> {
        let url = self.endpoint(path);
        let attempts = attempts.max(1);
        let mut last = ClientError::Request(format!("no attempt made for {url}"));

        for attempt in 1..=attempts {
            debug!(url = %url, attempt, "Querying collector");
            match self.get_once(&url).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(url = %url, attempt, remaining = attempts - attempt, error = %e, "Collector query failed");
                    last = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(last)
    }

    pub async fn open_tickets(&self) -> ClientResult<Vec<Ticket>> {
        info!("Getting ticket list...");
        let value = self.get_json("ticket/?raw&status=open", LIST_ATTEMPTS).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Parse(e.to_string()))
    }

    pub async fn ticket(&self, id: TicketId) -> ClientResult<Ticket> {
        let value = self.get_json(&ticket_query(id), TICKET_ATTEMPTS).await?;
        let mut tickets: Vec<Ticket> =
            serde_json::from_value(value).map_err(|e| ClientError::Parse(e.to_string()))?;
        if tickets.is_empty() {
            return Err(ClientError::NotFound(format!("ticket #{id}")));
        }
        Ok(tickets.swap_remove(0))
    }

    pub async fn trusted_authors(&self) -> ClientResult<BTreeSet<String>> {
        info!("Getting trusted author list...");
        let value = self.get_json("trusted", LIST_ATTEMPTS).await?;
        parse_trusted(value)
    }

    /// POST a report to `report/<id>`, attaching the log compressed.
    pub async fn submit_report(&self, id: TicketId, report: &Report, log: Option<&[u8]>) -> ClientResult<String> {
        let url = self.endpoint(&format!("report/{id}"));
        let mut form = Form::new().text(
            "report",
            serde_json::to_string(report).map_err(|e| ClientError::Parse(e.to_string()))?,
        );
        if let Some(log) = log {
            let compressed = compress_log(log)?;
            debug!(ticket = %id, raw = log.len(), compressed = compressed.len(), "Attaching log");
            form = form.part(
                "log",
                Part::bytes(compressed)
                    .file_name("log")
                    .mime_str("application/x-bzip2")?,
            );
        }

        let response = self.http.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        debug!(ticket = %id, status = %report.status, "Report accepted");
        Ok(body)
    }
}

/// `ticket/?raw&query={"id":N}`, URL-encoded.
pub fn ticket_query(id: TicketId) -> String {
    let query = serde_json::json!({ "id": id.get() }).to_string();
    format!("ticket/?raw&query={}", urlencoding::encode(&query))
}

/// The trusted author list is served as a JSON array or as an object keyed by author.
fn parse_trusted(value: Value) -> ClientResult<BTreeSet<String>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ClientError::Parse(format!("trusted author {other}"))),
            })
            .collect(),
        Value::Object(map) => Ok(map.into_iter().map(|(k, _)| k).collect()),
        other => Err(ClientError::Parse(format!("trusted authors: {other}"))),
    }
}

/// bzip2 at the highest compression level, as the collector expects.
pub fn compress_log(log: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(log)?;
    encoder.finish()
}
