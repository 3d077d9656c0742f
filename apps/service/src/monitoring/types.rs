use serde::{Deserialize, Serialize};

/// Any packet loss marks a probe as failed
pub const LOSS_THRESHOLD_PERCENT: f64 = 0.0;

/// Average RTT above this (with zero loss) marks a probe as slow
pub const HIGH_LATENCY_THRESHOLD_MS: f64 = 1000.0;

/// Health verdict of a single probe-location record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    HighLatency,
    Failed,
}

impl Verdict {
    pub fn is_failing(self) -> bool {
        !matches!(self, Verdict::Ok)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Ok => write!(f, "OK"),
            Verdict::HighLatency => write!(f, "High Latency"),
            Verdict::Failed => write!(f, "Failed"),
        }
    }
}

/// Verdicts for every record of one measurement, in record order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdicts: Vec<Verdict>,
}

impl Classification {
    /// At least one record is `Failed` or `HighLatency`
    pub fn has_failure(&self) -> bool {
        self.verdicts.iter().any(|v| v.is_failing())
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdicts.iter().filter(|v| **v == verdict).count()
    }
}
