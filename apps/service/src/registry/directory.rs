use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DirectorySettings;
use crate::database::models::Node;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("node directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node directory responded with {0}")]
    Status(StatusCode),
}

/// Source of the authoritative node list
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn fetch_nodes(&self) -> Result<Vec<Node>, DirectoryError>;
}

/// A node descriptor as the directory publishes it. Every field is
/// optional; [`NodeDescriptor::into_node`] decides what is usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: Option<String>,
    pub ip_address: Option<String>,
    pub region: Option<String>,
    pub dc_name: Option<String>,
    pub dc_id: Option<String>,
    pub status: Option<String>,
    pub node_type: Option<String>,
    pub node_provider_id: Option<String>,
}

impl NodeDescriptor {
    /// `None` when the identity or the probe target is missing
    pub fn into_node(self) -> Option<Node> {
        let node_id = self.node_id.filter(|id| !id.trim().is_empty())?;
        let address = self.ip_address.filter(|ip| !ip.trim().is_empty())?;

        debug!(
            node_id = %node_id,
            status = ?self.status,
            node_type = ?self.node_type,
            provider = ?self.node_provider_id,
            "Parsed node descriptor"
        );

        Some(Node {
            node_id,
            address,
            region: self.region.or_else(|| self.dc_name.clone()),
            dc_name: self.dc_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    nodes: Option<Vec<serde_json::Value>>,
}

/// Turn a raw directory body into nodes, dropping unusable entries.
///
/// A body that is not JSON, is not an object, or lacks the `nodes`
/// collection yields an empty list.
pub fn parse_directory(body: &str) -> Vec<Node> {
    let response: DirectoryResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("Unexpected node directory response: {}", e);
            return Vec::new();
        }
    };

    let Some(entries) = response.nodes else {
        warn!("Unexpected node directory response format, expected an object with a 'nodes' key");
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let node = serde_json::from_value::<NodeDescriptor>(entry.clone()).ok().and_then(NodeDescriptor::into_node);
            if node.is_none() {
                warn!("Skipping invalid node descriptor: {}", entry);
            }
            node
        })
        .collect()
}

/// HTTP client for the node directory
pub struct DirectoryClient {
    client: reqwest::Client,
    settings: DirectorySettings,
}

impl DirectoryClient {
    pub fn new(settings: DirectorySettings) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl NodeDirectory for DirectoryClient {
    async fn fetch_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
        let mut request = self.client.get(&self.settings.url);
        if let Some(provider) = &self.settings.provider_id {
            request = request.query(&[("node_provider_id", provider)]);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("Node directory responded with {}", status);
        if !status.is_success() {
            return Err(DirectoryError::Status(status));
        }

        let body = response.text().await?;
        Ok(parse_directory(&body))
    }
}
