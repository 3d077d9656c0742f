//! Text of the per-measurement chat alert.

use std::fmt::Write;

use crate::database::models::Measurement;
use crate::monitoring::summary::MeasurementSummary;
use crate::monitoring::types::Classification;
use crate::report::FleetReport;

fn ms(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}ms")).unwrap_or_else(|| "n/a".into())
}

/// Detailed listing when any probe is failing, a one-liner otherwise
pub fn alert_text(measurement: &Measurement, classification: &Classification) -> String {
    let result = &measurement.result;
    let summary = MeasurementSummary::of(result);

    if !classification.has_failure() {
        return format!(
            "[OK] Node {} ({}): all {} probes healthy, average latency {}",
            measurement.node_id,
            measurement.target,
            summary.total_probes,
            ms(summary.avg_latency)
        );
    }

    let failing: Vec<_> = result
        .probes
        .iter()
        .zip(&classification.verdicts)
        .filter(|(_, verdict)| verdict.is_failing())
        .collect();

    let mut text = format!(
        "[ALERT] Node {} ({}): {} of {} probes unhealthy in measurement {}",
        measurement.node_id,
        measurement.target,
        failing.len(),
        summary.total_probes,
        measurement.id
    );
    for (probe, verdict) in failing {
        let _ = write!(
            text,
            "\n- {}: {}, loss {}%, avg {}, max {}",
            probe.location,
            verdict,
            probe.stats.loss,
            ms(probe.stats.avg),
            ms(probe.stats.max)
        );
    }
    text
}

pub fn digest_subject(report: &FleetReport) -> String {
    format!("IC Node Monitoring Report - {}", report.generated_at.format("%Y-%m-%d"))
}

/// Plain-text digest body; failing nodes are listed first
pub fn digest_body(report: &FleetReport) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Node monitoring report generated {}", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(body, "Window: last {} hours", report.window_hours);
    let _ = writeln!(body, "Nodes measured: {}", report.total_nodes);
    let _ = writeln!(body, "Nodes with failures: {}", report.failing_nodes);
    let _ = writeln!(body, "Average latency: {}", ms(report.avg_latency));

    let mut nodes: Vec<_> = report.nodes.iter().collect();
    nodes.sort_by(|a, b| b.failure_rate.total_cmp(&a.failure_rate).then_with(|| a.node_id.cmp(&b.node_id)));

    let _ = writeln!(body);
    for node in nodes {
        let _ = writeln!(
            body,
            "{} [{}] measurements {}, failed {}, failure rate {:.2}%, avg latency {}",
            node.node_id,
            node.dc_name.as_deref().unwrap_or("-"),
            node.total_measurements,
            node.failed_measurements,
            node.failure_rate,
            ms(node.avg_latency)
        );
    }
    body
}
