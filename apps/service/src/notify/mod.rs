/// Notification module - immediate alerts and periodic digests
///
/// Alerts go out once per completed measurement through a chat webhook and
/// are retried with exponential backoff when the channel rate-limits us.
/// Digests are handed to an email transport on their own cadence. A channel
/// without configuration is skipped, never treated as an error.
pub mod dispatcher;
pub mod email;
pub mod message;
pub mod webhook;

pub use dispatcher::{AlertDispatcher, DeliveryOutcome, RetryPolicy};
pub use email::{DigestSink, SmtpDigestSink};
pub use webhook::{AlertSink, WebhookSink};

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel is rate limiting")]
    RateLimited,
    #[error("channel rejected the message with {0}")]
    Rejected(StatusCode),
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("channel request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid email address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to build email: {0}")]
    Email(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}
