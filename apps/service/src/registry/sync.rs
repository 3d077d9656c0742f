use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::directory::NodeDirectory;
use crate::database::Database;
use crate::database::models::Node;

/// Pulls the node list and merges it into the store
pub struct RegistrySync {
    directory: Arc<dyn NodeDirectory>,
    database: Arc<dyn Database>,
}

impl RegistrySync {
    pub fn new(directory: Arc<dyn NodeDirectory>, database: Arc<dyn Database>) -> Self {
        Self { directory, database }
    }

    /// Fetch and upsert. Nodes missing from the fetch stay in the store.
    ///
    /// A failing directory counts as an empty fetch; only a storage failure
    /// is returned as an error.
    pub async fn sync(&self) -> Result<Vec<Node>> {
        let nodes = match self.directory.fetch_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Error fetching nodes from directory: {}", e);
                Vec::new()
            }
        };

        let written = self.database.upsert_nodes(&nodes).await?;
        info!("Synchronized {} nodes from directory", written);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repository::tests::create_test_database;
    use crate::registry::DirectoryError;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    struct FixedDirectory(Vec<Node>);

    #[async_trait]
    impl NodeDirectory for FixedDirectory {
        async fn fetch_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDirectory;

    #[async_trait]
    impl NodeDirectory for BrokenDirectory {
        async fn fetch_nodes(&self) -> Result<Vec<Node>, DirectoryError> {
            Err(DirectoryError::Status(StatusCode::BAD_GATEWAY))
        }
    }

    fn node(id: &str) -> Node {
        Node { node_id: id.into(), address: format!("2001:db8::{id}"), region: None, dc_name: None }
    }

    #[tokio::test]
    async fn test_sync_merges_without_pruning() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let db: Arc<dyn Database> = Arc::new(db);

        RegistrySync::new(Arc::new(FixedDirectory(vec![node("a"), node("b")])), db.clone()).sync().await?;
        let synced = RegistrySync::new(Arc::new(FixedDirectory(vec![node("b"), node("c")])), db.clone()).sync().await?;
        assert_eq!(synced.len(), 2);

        let mut ids: Vec<String> = db.list_nodes().await?.into_iter().map(|n| n.node_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_failure_is_an_empty_sync() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let db: Arc<dyn Database> = Arc::new(db);
        db.upsert_nodes(&[node("a")]).await?;

        let synced = RegistrySync::new(Arc::new(BrokenDirectory), db.clone()).sync().await?;
        assert!(synced.is_empty());
        assert_eq!(db.list_nodes().await?.len(), 1);
        Ok(())
    }
}
