use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::NotifyError;

/// A near-real-time channel that takes one text message per call
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// One delivery attempt, no retries
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Slack-style incoming webhook (`{"text": ...}`)
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(url: impl AsRef<str>) -> Result<Self, NotifyError> {
        let url = Url::parse(url.as_ref())?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let response = self.client.post(self.url.clone()).json(&json!({ "text": text })).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::TOO_MANY_REQUESTS => Err(NotifyError::RateLimited),
            status => Err(NotifyError::Rejected(status)),
        }
    }
}
