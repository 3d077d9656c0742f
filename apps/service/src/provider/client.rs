use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use thiserror::Error;

use super::types::{CreatedMeasurement, MeasurementRequest, MeasurementResponse};
use crate::config::ProviderSettings;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("measurement {id} not finished after {waited:?}")]
    PollTimeout { id: String, waited: Duration },
    #[error("measurement {id} abandoned: shutdown requested")]
    Cancelled { id: String },
}

/// External service that runs ping measurements from its probe network
#[async_trait]
pub trait MeasurementProvider: Send + Sync {
    /// Start a measurement against `target`; returns the provider's id
    async fn create(&self, target: &str) -> Result<String, ProviderError>;

    /// Fetch the current state of a measurement
    async fn poll(&self, id: &str) -> Result<MeasurementResponse, ProviderError>;
}

/// HTTP client for a Globalping-compatible API
pub struct GlobalpingClient {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl GlobalpingClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => request.header(header::AUTHORIZATION, format!("Bearer {key}")),
            None => request,
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status { status, body })
}

#[async_trait]
impl MeasurementProvider for GlobalpingClient {
    async fn create(&self, target: &str) -> Result<String, ProviderError> {
        let request = MeasurementRequest::ping(
            target,
            self.settings.locations.clone(),
            self.settings.packets,
            self.settings.ip_version,
        );

        let response = self.authorize(self.client.post(&self.settings.url)).json(&request).send().await?;
        let created: CreatedMeasurement = ensure_success(response).await?.json().await?;
        Ok(created.id)
    }

    async fn poll(&self, id: &str) -> Result<MeasurementResponse, ProviderError> {
        let url = format!("{}/{}", self.settings.url.trim_end_matches('/'), id);
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}
