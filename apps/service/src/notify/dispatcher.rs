use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NotifyError;
use super::webhook::AlertSink;
use crate::config::AlertSettings;

/// Floor for the configured base delay; a zero base would retry in a tight loop
const MIN_BASE_DELAY: Duration = Duration::from_millis(10);

/// Exponential backoff for rate-limited deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &AlertSettings) -> Self {
        Self { max_attempts: settings.max_attempts.max(1), base_delay: settings.base_delay.max(MIN_BASE_DELAY) }
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// What happened to one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Still rate limited after the last attempt
    GaveUp { attempts: u32 },
    /// A non rate-limit failure; never retried
    Failed,
    /// No channel configured
    Skipped,
    Cancelled,
}

/// Sends alerts through an optional sink, retrying only on rate limiting
pub struct AlertDispatcher {
    sink: Option<Arc<dyn AlertSink>>,
    policy: RetryPolicy,
}

impl AlertDispatcher {
    pub fn new(sink: Option<Arc<dyn AlertSink>>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// A dispatcher with no channel; every alert is skipped
    pub fn disabled() -> Self {
        Self::new(None, RetryPolicy::default())
    }

    pub async fn dispatch(&self, text: &str, cancel: &CancellationToken) -> DeliveryOutcome {
        let Some(sink) = &self.sink else {
            debug!("Alert channel not configured, skipping alert");
            return DeliveryOutcome::Skipped;
        };

        let mut attempt = 1;
        loop {
            match sink.send(text).await {
                Ok(()) => {
                    debug!(attempt, "Alert delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(NotifyError::RateLimited) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    info!(attempt, ?delay, "Alert channel rate limited, backing off");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return DeliveryOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(NotifyError::RateLimited) => {
                    warn!(attempts = attempt, "Alert channel still rate limited, dropping alert");
                    return DeliveryOutcome::GaveUp { attempts: attempt };
                }
                Err(e) => {
                    warn!("Failed to send alert: {}", e);
                    return DeliveryOutcome::Failed;
                }
            }
        }
    }
}
