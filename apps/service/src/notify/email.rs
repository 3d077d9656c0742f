use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::NotifyError;
use super::message::{digest_body, digest_subject};
use crate::config::EmailSettings;
use crate::report::FleetReport;

/// Batch channel for the periodic digest
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, report: &FleetReport) -> Result<(), NotifyError>;
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Address { address: address.to_string(), reason: e.to_string() })
}

/// SMTP delivery with STARTTLS and login credentials
pub struct SmtpDigestSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpDigestSink {
    /// `Ok(None)` when credentials or recipients are missing
    pub fn from_settings(settings: &EmailSettings) -> Result<Option<Self>, NotifyError> {
        if !settings.is_complete() {
            return Ok(None);
        }
        let (Some(user), Some(password)) = (&settings.smtp_user, &settings.smtp_password) else {
            return Ok(None);
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)?
            .port(settings.smtp_port)
            .credentials(Credentials::new(user.clone(), password.clone()))
            .build();

        let sender = mailbox(settings.sender.as_deref().unwrap_or(user))?;
        let recipients = settings.recipients.iter().map(|r| mailbox(r)).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Self { transport, sender, recipients }))
    }

    fn build_message(&self, report: &FleetReport) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.sender.clone()).subject(digest_subject(report));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        Ok(builder.header(ContentType::TEXT_PLAIN).body(digest_body(report))?)
    }
}

#[async_trait]
impl DigestSink for SmtpDigestSink {
    async fn deliver(&self, report: &FleetReport) -> Result<(), NotifyError> {
        let message = self.build_message(report)?;
        self.transport.send(message).await?;
        info!(recipients = self.recipients.len(), "Digest email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::aggregate;
    use chrono::Utc;
    use std::time::Duration;

    fn settings() -> EmailSettings {
        EmailSettings {
            smtp_user: Some("ops@example.com".into()),
            smtp_password: Some("pw".into()),
            recipients: vec!["oncall@example.com".into(), "lead@example.com".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_incomplete_settings_disable_the_sink() {
        let mut incomplete = settings();
        incomplete.smtp_password = None;
        assert!(SmtpDigestSink::from_settings(&incomplete).unwrap().is_none());

        let mut no_recipients = settings();
        no_recipients.recipients.clear();
        assert!(SmtpDigestSink::from_settings(&no_recipients).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_addresses_every_recipient() {
        let sink = SmtpDigestSink::from_settings(&settings()).unwrap().unwrap();
        let report = aggregate(&[], Duration::from_secs(3600), Utc::now());
        let message = sink.build_message(&report).unwrap();

        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 2);
        assert_eq!(envelope.from().map(|a| a.to_string()), Some("ops@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_reported() {
        let mut bad = settings();
        bad.recipients = vec!["not an address".into()];
        assert!(matches!(SmtpDigestSink::from_settings(&bad), Err(NotifyError::Address { .. })));
    }
}
