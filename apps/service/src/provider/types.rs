//! Wire types of the measurement provider (Globalping-compatible).
//!
//! Responses are parsed into these loosely-required shapes first and then
//! normalized into [`MeasurementResult`], so nothing downstream has to care
//! whether a probe reported `stats` directly or nested under `result.stats`.

use serde::{Deserialize, Serialize};

use crate::config::LocationQuota;
use crate::database::models::{MeasurementResult, ProbeLocation, ProbeRecord, ProbeStats};

pub const STATUS_FINISHED: &str = "finished";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
    pub locations: Vec<LocationQuota>,
    pub measurement_options: MeasurementOptions,
    pub in_progress_updates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementOptions {
    pub packets: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<u8>,
}

impl MeasurementRequest {
    pub fn ping(target: impl Into<String>, locations: Vec<LocationQuota>, packets: u32, ip_version: Option<u8>) -> Self {
        Self {
            kind: "ping",
            target: target.into(),
            locations,
            measurement_options: MeasurementOptions { packets, ip_version },
            in_progress_updates: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedMeasurement {
    pub id: String,
}

/// Poll response for a single measurement
#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<RawProbeResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProbeResult {
    #[serde(default)]
    pub probe: RawProbe,
    /// Older API revisions put the statistics here
    pub stats: Option<RawStats>,
    pub result: Option<RawInnerResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProbe {
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInnerResult {
    pub status: Option<String>,
    pub stats: Option<RawStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStats {
    pub loss: Option<f64>,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    #[serde(alias = "total")]
    pub packets: Option<u32>,
}

impl MeasurementResponse {
    pub fn is_finished(&self) -> bool {
        self.status == STATUS_FINISHED
    }

    /// Normalize into the stored payload. Probes without any statistics are
    /// dropped.
    pub fn into_result(self) -> MeasurementResult {
        let probes = self.results.into_iter().filter_map(RawProbeResult::into_record).collect();
        MeasurementResult::new(self.status, probes)
    }
}

impl RawProbeResult {
    fn into_record(self) -> Option<ProbeRecord> {
        let stats = match (self.result.and_then(|inner| inner.stats), self.stats) {
            (Some(nested), _) => nested,
            (None, Some(flat)) => flat,
            (None, None) => {
                tracing::debug!(continent = ?self.probe.continent, "Dropping probe result without statistics");
                return None;
            }
        };

        Some(ProbeRecord {
            location: ProbeLocation {
                continent: self.probe.continent,
                country: self.probe.country,
                city: self.probe.city,
                asn: self.probe.asn,
                network: self.probe.network,
            },
            stats: ProbeStats {
                packets: stats.packets,
                loss: stats.loss.unwrap_or(0.0),
                min: stats.min,
                avg: stats.avg,
                max: stats.max,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = MeasurementRequest::ping(
            "2001:db8::1",
            vec![LocationQuota { continent: "EU".into(), limit: 4 }],
            16,
            Some(6),
        );
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "ping",
                "target": "2001:db8::1",
                "locations": [{"continent": "EU", "limit": 4}],
                "measurementOptions": {"packets": 16, "ipVersion": 6},
                "inProgressUpdates": true
            })
        );
    }

    #[test]
    fn test_both_stats_placements_normalize() {
        let response: MeasurementResponse = serde_json::from_value(json!({
            "status": "finished",
            "results": [
                {
                    "probe": {"continent": "EU", "country": "DE"},
                    "result": {"status": "finished", "stats": {"loss": 0, "min": 1.0, "avg": 2.0, "max": 3.0, "total": 16}}
                },
                {
                    "probe": {"continent": "AS", "country": "JP", "asn": 2516},
                    "stats": {"loss": 12.5, "avg": 250.0, "packets": 16}
                },
                {
                    "probe": {"continent": "NA", "country": "US"},
                    "result": {"status": "failed"}
                }
            ]
        }))
        .unwrap();

        let result = response.into_result();
        assert_eq!(result.status, "finished");
        assert_eq!(result.probes.len(), 2);
        assert_eq!(result.probes[0].stats.packets, Some(16));
        assert_eq!(result.probes[0].stats.avg, Some(2.0));
        assert_eq!(result.probes[1].stats.loss, 12.5);
        assert_eq!(result.probes[1].location.asn, Some(2516));
    }

    #[test]
    fn test_missing_results_is_empty() {
        let response: MeasurementResponse = serde_json::from_value(json!({"status": "in-progress"})).unwrap();
        assert!(!response.is_finished());
        assert!(response.into_result().probes.is_empty());
    }
}
