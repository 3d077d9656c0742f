use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::classifier::classify;
use super::summary;
use crate::config::ProviderSettings;
use crate::database::Database;
use crate::database::models::{Measurement, Node};
use crate::notify::message::alert_text;
use crate::notify::{AlertDispatcher, DeliveryOutcome};
use crate::provider::{MeasurementProvider, MeasurementResponse, ProviderError};

/// Where a node's lifecycle broke off
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to create measurement: {0}")]
    Create(#[source] ProviderError),
    #[error("failed to poll measurement: {0}")]
    Poll(#[source] ProviderError),
    #[error("failed to store measurement: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl NodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Poll(ProviderError::Cancelled { .. }))
    }
}

/// Result of one node's completed lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub measurement_id: String,
    pub failing: bool,
    pub alert: DeliveryOutcome,
}

/// Drives a single node through create, poll, classify, alert and store
pub struct MeasurementExecutor {
    provider: Arc<dyn MeasurementProvider>,
    database: Arc<dyn Database>,
    alerts: Arc<AlertDispatcher>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl MeasurementExecutor {
    pub fn new(
        provider: Arc<dyn MeasurementProvider>,
        database: Arc<dyn Database>,
        alerts: Arc<AlertDispatcher>,
        settings: &ProviderSettings,
    ) -> Self {
        Self {
            provider,
            database,
            alerts,
            poll_interval: settings.poll_interval,
            poll_timeout: settings.poll_timeout,
        }
    }

    pub async fn execute(&self, node: &Node, cancel: &CancellationToken) -> Result<NodeOutcome, NodeError> {
        let measurement_id = self.provider.create(&node.address).await.map_err(NodeError::Create)?;
        let created_at = Utc::now();
        info!(node_id = %node.node_id, measurement_id = %measurement_id, "Created measurement");

        let response = self.wait_for_completion(&measurement_id, cancel).await.map_err(NodeError::Poll)?;

        let status = response.status.clone();
        let result = response.into_result();
        let classification = classify(&result);
        info!("{}", summary::render(&node.node_id, &result, &classification));

        let measurement = Measurement {
            id: measurement_id,
            node_id: node.node_id.clone(),
            target: node.address.clone(),
            created_at,
            status,
            result,
        };

        let alert = self.alerts.dispatch(&alert_text(&measurement, &classification), cancel).await;

        self.database.insert_measurement(&measurement).await.map_err(NodeError::Store)?;
        info!(node_id = %node.node_id, measurement_id = %measurement.id, "Stored measurement");

        Ok(NodeOutcome { measurement_id: measurement.id, failing: classification.has_failure(), alert })
    }

    /// Poll at a fixed interval until finished, bounded by the poll timeout
    async fn wait_for_completion(&self, id: &str, cancel: &CancellationToken) -> Result<MeasurementResponse, ProviderError> {
        let started = Instant::now();

        loop {
            let response = self.provider.poll(id).await?;
            if response.is_finished() {
                return Ok(response);
            }

            let waited = started.elapsed();
            if waited >= self.poll_timeout {
                return Err(ProviderError::PollTimeout { id: id.to_string(), waited });
            }
            debug!(measurement_id = %id, status = %response.status, "Measurement still running");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled { id: id.to_string() }),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
