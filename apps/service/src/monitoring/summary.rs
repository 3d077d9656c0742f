//! Human-readable rendering of a completed measurement for the console log.

use std::fmt::Write;

use super::types::Classification;
use crate::database::models::MeasurementResult;

/// Headline numbers of one measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSummary {
    pub total_probes: usize,
    pub failed_probes: usize,
    /// Mean of the probe averages over loss-free probes
    pub avg_latency: Option<f64>,
}

impl MeasurementSummary {
    pub fn of(result: &MeasurementResult) -> Self {
        let failed_probes = result.probes.iter().filter(|p| p.stats.loss > 0.0).count();
        let latencies: Vec<f64> =
            result.probes.iter().filter(|p| p.stats.loss == 0.0).filter_map(|p| p.stats.avg).collect();
        let avg_latency = (!latencies.is_empty()).then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);

        Self { total_probes: result.probes.len(), failed_probes, avg_latency }
    }
}

fn ms(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}ms")).unwrap_or_else(|| "N/A".into())
}

/// Render the per-probe table followed by the summary block
pub fn render(node_id: &str, result: &MeasurementResult, classification: &Classification) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Measurement Results for Node {node_id}");
    let _ = writeln!(
        out,
        "{:<32} {:<13} {:>7} {:>7} {:>10} {:>10} {:>10}",
        "Probe Location", "Status", "Packets", "Loss", "Min RTT", "Avg RTT", "Max RTT"
    );

    for (probe, verdict) in result.probes.iter().zip(&classification.verdicts) {
        let packets = probe.stats.packets.map(|p| p.to_string()).unwrap_or_else(|| "N/A".into());
        let _ = writeln!(
            out,
            "{:<32} {:<13} {:>7} {:>6}% {:>10} {:>10} {:>10}",
            probe.location.to_string(),
            verdict.to_string(),
            packets,
            probe.stats.loss,
            ms(probe.stats.min),
            ms(probe.stats.avg),
            ms(probe.stats.max),
        );
    }

    let summary = MeasurementSummary::of(result);
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total Probes: {}", summary.total_probes);
    let _ = writeln!(out, "  Failed Probes: {}", summary.failed_probes);
    let _ = write!(out, "  Average Latency: {}", ms(summary.avg_latency));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ProbeLocation, ProbeRecord, ProbeStats};
    use crate::monitoring::classify;

    fn result() -> MeasurementResult {
        let probe = |continent: &str, loss: f64, avg: f64| ProbeRecord {
            location: ProbeLocation { continent: Some(continent.into()), country: Some("XX".into()), ..Default::default() },
            stats: ProbeStats { packets: Some(16), loss, min: Some(avg), avg: Some(avg), max: Some(avg) },
        };
        MeasurementResult::new("finished", vec![probe("EU", 0.0, 100.0), probe("NA", 0.0, 200.0), probe("AS", 5.0, 999.0)])
    }

    #[test]
    fn test_summary_excludes_lossy_latency() {
        let summary = MeasurementSummary::of(&result());
        assert_eq!(summary.total_probes, 3);
        assert_eq!(summary.failed_probes, 1);
        assert_eq!(summary.avg_latency, Some(150.0));
    }

    #[test]
    fn test_render_lists_every_probe() {
        let result = result();
        let table = render("node-a", &result, &classify(&result));
        assert!(table.contains("Measurement Results for Node node-a"));
        assert!(table.contains("AS - XX"));
        assert!(table.contains("Failed"));
        assert!(table.contains("Average Latency: 150.00ms"));
    }
}
