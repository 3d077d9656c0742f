use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Version tag written into every stored result payload
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// Node model - a monitored endpoint from the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    /// Probe target, an IPv6 literal for IC nodes
    pub address: String,
    pub region: Option<String>,
    pub dc_name: Option<String>,
}

/// Where a probe ran from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeLocation {
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
    pub network: Option<String>,
}

impl std::fmt::Display for ProbeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let continent = self.continent.as_deref().unwrap_or("N/A");
        let country = self.country.as_deref().unwrap_or("N/A");
        match &self.city {
            Some(city) => write!(f, "{continent} - {country} ({city})"),
            None => write!(f, "{continent} - {country}"),
        }
    }
}

/// Ping statistics of one probe. RTTs are milliseconds, loss is a percentage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStats {
    pub packets: Option<u32>,
    pub loss: f64,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
}

/// One vantage point's record inside a measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub location: ProbeLocation,
    pub stats: ProbeStats,
}

/// Normalized result payload persisted in `measurements.result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub version: u32,
    pub status: String,
    pub probes: Vec<ProbeRecord>,
}

impl MeasurementResult {
    pub fn new(status: impl Into<String>, probes: Vec<ProbeRecord>) -> Self {
        Self { version: RESULT_SCHEMA_VERSION, status: status.into(), probes }
    }
}

/// Measurement model - one completed probing run, never mutated once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: String,
    pub node_id: String,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub result: MeasurementResult,
}

/// A measurement joined with the attributes of its node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    #[serde(flatten)]
    pub measurement: Measurement,
    pub region: Option<String>,
    pub dc_name: Option<String>,
}

/// Stored as integer milliseconds so the per-node ordering survives
/// several measurements within one second
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip_keeps_millis() {
        let now = i64_to_timestamp(1_700_000_000_123);
        assert_eq!(timestamp_to_i64(now), 1_700_000_000_123);
    }

    #[test]
    fn test_location_display() {
        let location = ProbeLocation {
            continent: Some("EU".into()),
            country: Some("DE".into()),
            ..Default::default()
        };
        assert_eq!(location.to_string(), "EU - DE");
        assert_eq!(ProbeLocation::default().to_string(), "N/A - N/A");
    }
}
