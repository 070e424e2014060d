use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;
use crate::models::{AuditLogResponse, Event};

pub const DEFAULT_BASE_URL: &str = "https://cloud.tenable.com";
const EVENTS_ENDPOINT: &str = "audit-log/v1/events";
const USER_AGENT: &str = concat!("audit-notifier/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait EventSource {
    /// Returns the events received strictly after `since`, in server order.
    async fn fetch(&self, since: NaiveDate) -> Result<Vec<Event>, FetchError>;
}

pub struct TenableClient {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl TenableClient {
    pub fn new(base_url: &str, access_key: &str, secret_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn api_keys(&self) -> String {
        format!("accessKey={}; secretKey={};", self.access_key, self.secret_key)
    }
}

pub fn date_filter(since: NaiveDate) -> String {
    format!("date.gt:{}", since.format("%Y-%m-%d"))
}

#[async_trait]
impl EventSource for TenableClient {
    async fn fetch(&self, since: NaiveDate) -> Result<Vec<Event>, FetchError> {
        let url = format!("{}/{}", self.base_url, EVENTS_ENDPOINT);
        let filter = date_filter(since);

        tracing::info!("Requesting audit logs from {} with filter {}", url, filter);

        let response = self
            .client
            .get(&url)
            .query(&[("f", filter.as_str())])
            .header("X-ApiKeys", self.api_keys())
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(FetchError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        let logs: AuditLogResponse = serde_json::from_slice(&bytes)?;

        tracing::info!("{} events returned", logs.events.len());
        if let Some(total) = logs.pagination.total {
            if total > logs.events.len() as u64 {
                // Only the first page is read.
                tracing::warn!(
                    "Audit log reports {} events but only {} were returned; the remainder is not fetched",
                    total,
                    logs.events.len()
                );
            }
        }

        Ok(logs.events)
    }
}
