use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::DeliveryError;

#[async_trait]
pub trait Notifier {
    /// Delivers one message. `Ok` means the destination accepted it.
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError>;
}

/// Posts messages to a Slack incoming webhook. The URL is the only credential.
pub struct SlackClient {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackClient {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for SlackClient {
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        let mut body = HashMap::new();
        body.insert("text", text);

        let response = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            return Err(DeliveryError::Status { status, body });
        }

        Ok(())
    }
}
