//! Health classification of probe statistics.

use std::collections::HashMap;

use serde::Serialize;

use super::types::{Classification, HIGH_LATENCY_THRESHOLD_MS, LOSS_THRESHOLD_PERCENT, Verdict};
use crate::database::models::{MeasurementRecord, MeasurementResult, ProbeStats};

/// Loss wins over latency: a lossy probe is `Failed` whatever its RTT.
pub fn classify_probe(stats: &ProbeStats) -> Verdict {
    if stats.loss > LOSS_THRESHOLD_PERCENT {
        Verdict::Failed
    } else if stats.avg.is_some_and(|avg| avg > HIGH_LATENCY_THRESHOLD_MS) {
        Verdict::HighLatency
    } else {
        Verdict::Ok
    }
}

pub fn classify(result: &MeasurementResult) -> Classification {
    Classification { verdicts: result.probes.iter().map(|probe| classify_probe(&probe.stats)).collect() }
}

/// A node with at least one failing record inside the lookback window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingNode {
    pub node_id: String,
    pub region: Option<String>,
    pub dc_name: Option<String>,
    /// Measurements of this node inside the window
    pub measurements: usize,
    /// Ids of the measurements that contain a failing record, newest first
    pub failing_measurements: Vec<String>,
}

/// Nodes that failed at any point of the window, not just in their latest
/// measurement. Output follows first appearance in `records`.
pub fn failing_nodes(records: &[MeasurementRecord]) -> Vec<FailingNode> {
    let mut order: Vec<&str> = Vec::new();
    let mut nodes: HashMap<&str, FailingNode> = HashMap::new();

    for record in records {
        let measurement = &record.measurement;
        let entry = nodes.entry(measurement.node_id.as_str()).or_insert_with(|| {
            order.push(measurement.node_id.as_str());
            FailingNode {
                node_id: measurement.node_id.clone(),
                region: record.region.clone(),
                dc_name: record.dc_name.clone(),
                measurements: 0,
                failing_measurements: Vec::new(),
            }
        });

        entry.measurements += 1;
        if classify(&measurement.result).has_failure() {
            entry.failing_measurements.push(measurement.id.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|node_id| nodes.remove(node_id))
        .filter(|node| !node.failing_measurements.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Measurement, ProbeLocation, ProbeRecord};
    use chrono::{Duration, Utc};

    fn stats(loss: f64, avg: f64) -> ProbeStats {
        ProbeStats { packets: Some(16), loss, min: Some(avg / 2.0), avg: Some(avg), max: Some(avg * 2.0) }
    }

    fn record(id: &str, node_id: &str, age_minutes: i64, probes: &[(f64, f64)]) -> MeasurementRecord {
        let probes = probes
            .iter()
            .map(|(loss, avg)| ProbeRecord { location: ProbeLocation::default(), stats: stats(*loss, *avg) })
            .collect();
        MeasurementRecord {
            measurement: Measurement {
                id: id.into(),
                node_id: node_id.into(),
                target: "2001:db8::1".into(),
                created_at: Utc::now() - Duration::minutes(age_minutes),
                status: "finished".into(),
                result: MeasurementResult::new("finished", probes),
            },
            region: None,
            dc_name: None,
        }
    }

    #[test]
    fn test_loss_is_failed_regardless_of_latency() {
        for avg in [0.0, 12.0, 999.9, 1000.0, 5000.0] {
            assert_eq!(classify_probe(&stats(0.1, avg)), Verdict::Failed);
            assert_eq!(classify_probe(&stats(100.0, avg)), Verdict::Failed);
        }
    }

    #[test]
    fn test_latency_thresholds_without_loss() {
        assert_eq!(classify_probe(&stats(0.0, 1000.1)), Verdict::HighLatency);
        assert_eq!(classify_probe(&stats(0.0, 4000.0)), Verdict::HighLatency);
        assert_eq!(classify_probe(&stats(0.0, 1000.0)), Verdict::Ok);
        assert_eq!(classify_probe(&stats(0.0, 3.2)), Verdict::Ok);
    }

    #[test]
    fn test_missing_average_is_ok() {
        let stats = ProbeStats { loss: 0.0, ..Default::default() };
        assert_eq!(classify_probe(&stats), Verdict::Ok);
    }

    #[test]
    fn test_measurement_classification() {
        let healthy = record("m1", "a", 0, &[(0.0, 10.0), (0.0, 20.0)]);
        let classification = classify(&healthy.measurement.result);
        assert!(!classification.has_failure());
        assert_eq!(classification.count(Verdict::Ok), 2);

        let slow = record("m2", "a", 0, &[(0.0, 10.0), (0.0, 1500.0)]);
        let classification = classify(&slow.measurement.result);
        assert!(classification.has_failure());
        assert_eq!(classification.verdicts, vec![Verdict::Ok, Verdict::HighLatency]);
    }

    #[test]
    fn test_failing_nodes_considers_whole_window() {
        let records = vec![
            record("a-new", "a", 10, &[(0.0, 10.0)]),
            record("b-new", "b", 20, &[(0.0, 10.0)]),
            record("a-old", "a", 300, &[(25.0, 10.0)]),
            record("b-old", "b", 400, &[(0.0, 10.0)]),
        ];

        let failing = failing_nodes(&records);
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].node_id, "a");
        assert_eq!(failing[0].measurements, 2);
        assert_eq!(failing[0].failing_measurements, vec!["a-old"]);
    }
}
