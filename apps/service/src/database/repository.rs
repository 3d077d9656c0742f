use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::models::{Measurement, MeasurementRecord, MeasurementResult, Node, i64_to_timestamp, timestamp_to_i64};
use crate::pool::LibsqlPool;

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert or overwrite nodes by `node_id`; returns how many were written
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize>;

    /// Get every known node, including ones the registry no longer lists
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Append a measurement. Inserting an existing id is an error.
    async fn insert_measurement(&self, measurement: &Measurement) -> Result<()>;

    /// Get a measurement by the provider-issued id
    async fn get_measurement(&self, id: &str) -> Result<Option<MeasurementRecord>>;

    /// Measurements of one node created strictly after `cutoff`, oldest first
    async fn measurements_since(&self, node_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<Measurement>>;

    /// Measurements of all nodes created strictly after `cutoff`, newest first
    async fn window(&self, cutoff: DateTime<Utc>) -> Result<Vec<MeasurementRecord>>;

    /// A page of measurements, newest first
    async fn list_measurements(&self, limit: usize, offset: usize) -> Result<Vec<MeasurementRecord>>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

const RECORD_COLUMNS: &str = "m.id, m.node_id, m.target, m.created_at, m.status, m.result, n.region, n.dc_name";

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_records(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<MeasurementRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut records = Vec::new();

        while let Some(row) = rows.next().await? {
            records.push(MeasurementRecord {
                measurement: measurement_from_row(&row)?,
                region: row.get(6)?,
                dc_name: row.get(7)?,
            });
        }

        Ok(records)
    }
}

/// Reads columns 0..=5 as laid out in `RECORD_COLUMNS`
fn measurement_from_row(row: &Row) -> Result<Measurement> {
    let id: String = row.get(0)?;
    let created_at: i64 = row.get(3)?;
    let raw_result: String = row.get(5)?;
    let result: MeasurementResult =
        serde_json::from_str(&raw_result).with_context(|| format!("corrupt result payload for measurement {id}"))?;

    Ok(Measurement {
        node_id: row.get(1)?,
        target: row.get(2)?,
        created_at: i64_to_timestamp(created_at),
        status: row.get(4)?,
        result,
        id,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        for node in nodes {
            tx.execute(
                "INSERT INTO nodes (node_id, address, region, dc_name) VALUES (?, ?, ?, ?)
                 ON CONFLICT(node_id) DO UPDATE SET
                    address = excluded.address,
                    region = excluded.region,
                    dc_name = excluded.dc_name",
                params![node.node_id.clone(), node.address.clone(), node.region.clone(), node.dc_name.clone()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(nodes.len())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT node_id, address, region, dc_name FROM nodes ORDER BY rowid", ()).await?;
        let mut nodes = Vec::new();

        while let Some(row) = rows.next().await? {
            nodes.push(Node {
                node_id: row.get(0)?,
                address: row.get(1)?,
                region: row.get(2)?,
                dc_name: row.get(3)?,
            });
        }

        Ok(nodes)
    }

    async fn insert_measurement(&self, measurement: &Measurement) -> Result<()> {
        let conn = self.get_conn().await?;
        let result = serde_json::to_string(&measurement.result)?;

        conn.execute(
            "INSERT INTO measurements (id, node_id, target, created_at, status, result) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                measurement.id.clone(),
                measurement.node_id.clone(),
                measurement.target.clone(),
                timestamp_to_i64(measurement.created_at),
                measurement.status.clone(),
                result
            ],
        )
        .await
        .with_context(|| format!("failed to insert measurement {}", measurement.id))?;

        Ok(())
    }

    async fn get_measurement(&self, id: &str) -> Result<Option<MeasurementRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM measurements m JOIN nodes n ON m.node_id = n.node_id WHERE m.id = ?"
        );
        Ok(self.query_records(&sql, params![id]).await?.into_iter().next())
    }

    async fn measurements_since(&self, node_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<Measurement>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, node_id, target, created_at, status, result FROM measurements
                 WHERE node_id = ? AND created_at > ? ORDER BY created_at ASC",
                params![node_id, timestamp_to_i64(cutoff)],
            )
            .await?;
        let mut measurements = Vec::new();

        while let Some(row) = rows.next().await? {
            measurements.push(measurement_from_row(&row)?);
        }

        Ok(measurements)
    }

    async fn window(&self, cutoff: DateTime<Utc>) -> Result<Vec<MeasurementRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM measurements m JOIN nodes n ON m.node_id = n.node_id
             WHERE m.created_at > ? ORDER BY m.created_at DESC"
        );
        self.query_records(&sql, params![timestamp_to_i64(cutoff)]).await
    }

    async fn list_measurements(&self, limit: usize, offset: usize) -> Result<Vec<MeasurementRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM measurements m JOIN nodes n ON m.node_id = n.node_id
             ORDER BY m.created_at DESC LIMIT ? OFFSET ?"
        );
        self.query_records(&sql, params![limit as i64, offset as i64]).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::models::{ProbeLocation, ProbeRecord, ProbeStats};
    use crate::pool::open_pool;
    use chrono::Duration;
    use tempfile::TempDir;

    /// Helper to create a migrated database in a temporary directory
    pub(crate) async fn create_test_database() -> Result<(DatabaseImpl, TempDir)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.db");
        let pool = open_pool(path.to_string_lossy().as_ref(), 2).await?;

        let conn = pool.get().await?;
        crate::database::initialize_database(&conn).await?;
        drop(conn);

        Ok((DatabaseImpl::new_from_pool(pool), dir))
    }

    fn node(id: &str, address: &str) -> Node {
        Node { node_id: id.into(), address: address.into(), region: Some("eu".into()), dc_name: Some("fr1".into()) }
    }

    fn measurement(id: &str, node_id: &str, created_at: DateTime<Utc>, loss: f64) -> Measurement {
        Measurement {
            id: id.into(),
            node_id: node_id.into(),
            target: "2001:db8::1".into(),
            created_at,
            status: "finished".into(),
            result: MeasurementResult::new(
                "finished",
                vec![ProbeRecord {
                    location: ProbeLocation { continent: Some("EU".into()), ..Default::default() },
                    stats: ProbeStats { packets: Some(16), loss, min: Some(10.0), avg: Some(12.5), max: Some(20.0) },
                }],
            ),
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_identity() -> Result<()> {
        let (db, _dir) = create_test_database().await?;

        db.upsert_nodes(&[node("a", "2001:db8::1"), node("b", "2001:db8::2")]).await?;
        let mut moved = node("a", "2001:db8::99");
        moved.dc_name = None;
        db.upsert_nodes(&[moved.clone()]).await?;

        let nodes = db.list_nodes().await?;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.iter().find(|n| n.node_id == "a"), Some(&moved));
        assert!(nodes.iter().any(|n| n.node_id == "b"));
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_empty_is_noop() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        assert_eq!(db.upsert_nodes(&[]).await?, 0);
        assert!(db.list_nodes().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_measurement_is_immutable_after_insert() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        db.upsert_nodes(&[node("a", "2001:db8::1")]).await?;

        let original = measurement("m1", "a", Utc::now(), 0.0);
        db.insert_measurement(&original).await?;

        let mut rewritten = original.clone();
        rewritten.result.probes.clear();
        assert!(db.insert_measurement(&rewritten).await.is_err());

        let stored = db.get_measurement("m1").await?.expect("measurement stored");
        assert_eq!(stored.measurement.result, original.result);
        assert_eq!(stored.region.as_deref(), Some("eu"));
        assert!(db.get_measurement("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_window_queries() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        db.upsert_nodes(&[node("a", "2001:db8::1"), node("b", "2001:db8::2")]).await?;

        let now = Utc::now();
        db.insert_measurement(&measurement("old", "a", now - Duration::hours(30), 0.0)).await?;
        db.insert_measurement(&measurement("a1", "a", now - Duration::hours(2), 0.0)).await?;
        db.insert_measurement(&measurement("a2", "a", now - Duration::hours(1), 5.0)).await?;
        db.insert_measurement(&measurement("b1", "b", now - Duration::minutes(30), 0.0)).await?;

        let cutoff = now - Duration::hours(24);
        let recent_a: Vec<String> = db.measurements_since("a", cutoff).await?.into_iter().map(|m| m.id).collect();
        assert_eq!(recent_a, vec!["a1", "a2"]);

        let window: Vec<String> = db.window(cutoff).await?.into_iter().map(|r| r.measurement.id).collect();
        assert_eq!(window, vec!["b1", "a2", "a1"]);

        let page: Vec<String> = db.list_measurements(2, 1).await?.into_iter().map(|r| r.measurement.id).collect();
        assert_eq!(page, vec!["a2", "a1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_measurement_requires_known_node() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        assert!(db.insert_measurement(&measurement("m1", "ghost", Utc::now(), 0.0)).await.is_err());
        Ok(())
    }
}
