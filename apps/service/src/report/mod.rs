//! Reporting aggregator.
//!
//! Windows the measurement history and reduces it to per-node and fleet
//! statistics. The same [`FleetReport`] feeds the periodic digest and the
//! CLI queries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::Database;
use crate::database::models::MeasurementRecord;
use crate::monitoring::{FailingNode, failing_nodes};

/// Statistics of one node over the window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub region: Option<String>,
    pub dc_name: Option<String>,
    pub total_measurements: usize,
    /// Lossy probe records, counted individually across all measurements
    pub failed_measurements: usize,
    /// `failed_measurements / total_measurements` as a percentage
    pub failure_rate: f64,
    /// Mean RTT over loss-free records only; `None` when there are none
    pub avg_latency: Option<f64>,
}

/// Payload of the periodic digest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: f64,
    /// Nodes with at least one measurement in the window
    pub total_nodes: usize,
    /// Nodes with a nonzero failure rate
    pub failing_nodes: usize,
    /// Mean of the per-node averages that exist
    pub avg_latency: Option<f64>,
    pub nodes: Vec<NodeStats>,
}

#[derive(Default)]
struct Accumulator<'a> {
    region: Option<&'a str>,
    dc_name: Option<&'a str>,
    measurements: usize,
    failed: usize,
    latency_sum: f64,
    latency_count: usize,
}

/// Reduce window rows to a report. Nodes absent from `records` are absent
/// from the report.
pub fn aggregate(records: &[MeasurementRecord], window: Duration, generated_at: DateTime<Utc>) -> FleetReport {
    let mut per_node: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for record in records {
        let acc = per_node.entry(record.measurement.node_id.as_str()).or_default();
        acc.region = record.region.as_deref();
        acc.dc_name = record.dc_name.as_deref();
        acc.measurements += 1;

        for probe in &record.measurement.result.probes {
            if probe.stats.loss > 0.0 {
                acc.failed += 1;
            } else if let Some(avg) = probe.stats.avg {
                acc.latency_sum += avg;
                acc.latency_count += 1;
            }
        }
    }

    let nodes: Vec<NodeStats> = per_node
        .into_iter()
        .map(|(node_id, acc)| NodeStats {
            node_id: node_id.to_string(),
            region: acc.region.map(str::to_string),
            dc_name: acc.dc_name.map(str::to_string),
            total_measurements: acc.measurements,
            failed_measurements: acc.failed,
            failure_rate: acc.failed as f64 / acc.measurements as f64 * 100.0,
            avg_latency: (acc.latency_count > 0).then(|| acc.latency_sum / acc.latency_count as f64),
        })
        .collect();

    let latencies: Vec<f64> = nodes.iter().filter_map(|n| n.avg_latency).collect();

    FleetReport {
        generated_at,
        window_hours: window.as_secs_f64() / 3600.0,
        total_nodes: nodes.len(),
        failing_nodes: nodes.iter().filter(|n| n.failure_rate > 0.0).count(),
        avg_latency: (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64),
        nodes,
    }
}

/// Start of the trailing window. Windows reaching past the representable
/// range start at the earliest representable instant.
pub fn window_start(window: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Reads the store and builds reports over a trailing window
pub struct ReportingAggregator {
    database: Arc<dyn Database>,
}

impl ReportingAggregator {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    async fn window_records(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<MeasurementRecord>> {
        self.database.window(window_start(window, now)).await
    }

    pub async fn report(&self, window: Duration) -> Result<FleetReport> {
        let now = Utc::now();
        let records = self.window_records(window, now).await?;
        Ok(aggregate(&records, window, now))
    }

    pub async fn failing_nodes(&self, window: Duration) -> Result<Vec<FailingNode>> {
        let records = self.window_records(window, Utc::now()).await?;
        Ok(failing_nodes(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Measurement, MeasurementResult, Node, ProbeLocation, ProbeRecord, ProbeStats};
    use crate::database::repository::tests::create_test_database;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn record(id: &str, node_id: &str, age_hours: i64, probes: &[(f64, f64)]) -> MeasurementRecord {
        let probes = probes
            .iter()
            .map(|(loss, avg)| ProbeRecord {
                location: ProbeLocation::default(),
                stats: ProbeStats { packets: Some(16), loss: *loss, min: None, avg: Some(*avg), max: None },
            })
            .collect();
        MeasurementRecord {
            measurement: Measurement {
                id: id.into(),
                node_id: node_id.into(),
                target: "2001:db8::1".into(),
                created_at: Utc::now() - chrono::Duration::hours(age_hours),
                status: "finished".into(),
                result: MeasurementResult::new("finished", probes),
            },
            region: Some("Europe".into()),
            dc_name: Some("fr1".into()),
        }
    }

    #[test]
    fn test_latency_excludes_lossy_records() {
        let records = vec![record("m1", "a", 1, &[(0.0, 100.0), (0.0, 200.0), (5.0, 999.0)])];
        let report = aggregate(&records, DAY, Utc::now());
        assert_eq!(report.nodes[0].avg_latency, Some(150.0));
        assert_eq!(report.avg_latency, Some(150.0));
    }

    #[test]
    fn test_failure_rate_is_a_percentage() {
        let records = vec![
            record("m1", "a", 1, &[(0.0, 10.0)]),
            record("m2", "a", 2, &[(0.0, 10.0)]),
            record("m3", "a", 3, &[(50.0, 10.0)]),
            record("m4", "a", 4, &[(0.0, 10.0)]),
        ];
        let report = aggregate(&records, DAY, Utc::now());
        let node = &report.nodes[0];
        assert_eq!(node.total_measurements, 4);
        assert_eq!(node.failed_measurements, 1);
        assert_eq!(node.failure_rate, 25.0);
        assert_eq!(report.failing_nodes, 1);
    }

    #[test]
    fn test_failures_count_per_record() {
        let records = vec![record("m1", "a", 1, &[(10.0, 10.0), (20.0, 10.0)]), record("m2", "a", 2, &[(0.0, 10.0)])];
        let report = aggregate(&records, DAY, Utc::now());
        assert_eq!(report.nodes[0].failed_measurements, 2);
        assert_eq!(report.nodes[0].failure_rate, 100.0);
    }

    #[test]
    fn test_fleet_aggregates() {
        let records = vec![
            record("m1", "a", 1, &[(0.0, 100.0)]),
            record("m2", "b", 1, &[(0.0, 300.0)]),
            record("m3", "c", 1, &[(100.0, 0.0)]),
        ];
        let report = aggregate(&records, DAY, Utc::now());
        assert_eq!(report.total_nodes, 3);
        assert_eq!(report.failing_nodes, 1);
        assert_eq!(report.nodes[2].avg_latency, None);
        assert_eq!(report.avg_latency, Some(200.0));
        assert_eq!(report.window_hours, 24.0);
    }

    #[test]
    fn test_empty_window_is_empty_report() {
        let report = aggregate(&[], DAY, Utc::now());
        assert_eq!(report.total_nodes, 0);
        assert!(report.nodes.is_empty());
        assert_eq!(report.avg_latency, None);
    }

    #[tokio::test]
    async fn test_report_skips_nodes_outside_window() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let nodes = ["a", "b"].map(|id| Node {
            node_id: id.into(),
            address: "2001:db8::1".into(),
            region: None,
            dc_name: None,
        });
        db.upsert_nodes(&nodes).await?;
        db.insert_measurement(&record("recent", "a", 1, &[(0.0, 42.0)]).measurement).await?;
        db.insert_measurement(&record("stale", "b", 48, &[(100.0, 0.0)]).measurement).await?;

        let aggregator = ReportingAggregator::new(Arc::new(db));
        let report = aggregator.report(DAY).await?;
        assert_eq!(report.total_nodes, 1);
        assert_eq!(report.nodes[0].node_id, "a");
        assert!(aggregator.failing_nodes(DAY).await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_window_start_saturates() {
        let now = Utc::now();
        assert_eq!(window_start(DAY, now), now - chrono::Duration::hours(24));
        assert_eq!(window_start(Duration::from_secs(10_000_000_000 * 3600), now), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(Duration::MAX, now), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_huge_window_covers_all_history() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let node = Node { node_id: "a".into(), address: "2001:db8::1".into(), region: None, dc_name: None };
        db.upsert_nodes(&[node]).await?;
        db.insert_measurement(&record("old", "a", 24 * 365, &[(100.0, 0.0)]).measurement).await?;

        let aggregator = ReportingAggregator::new(Arc::new(db));
        let window = Duration::from_secs(10_000_000_000 * 3600);
        let failing = aggregator.failing_nodes(window).await?;
        assert_eq!(failing.len(), 1);
        assert_eq!(aggregator.report(window).await?.total_nodes, 1);
        Ok(())
    }
}
