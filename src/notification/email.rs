use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use super::{AlertPayload, AlertSink};
use crate::config::{Config, SmtpConfig, SmtpTls};

pub const EMAIL_TIMEOUT: Duration = Duration::from_secs(10);
pub const ALERT_SUBJECT: &str = "SSRF Canary hit";
const DEFAULT_FROM: &str = "canary@example.com";

/// Sends alert mail through an SMTP relay.
///
/// lettre's `SmtpTransport` is synchronous, so each send runs on the
/// blocking pool under [`EMAIL_TIMEOUT`].
#[derive(Clone)]
pub struct EmailNotifier {
    smtp: SmtpConfig,
    host: String,
    recipient: String,
}

impl EmailNotifier {
    /// `None` unless both an SMTP host and a recipient are configured.
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let host = cfg.smtp.host.clone()?;
        let recipient = cfg.alert_email.clone()?;
        Some(Self {
            smtp: cfg.smtp.clone(),
            host,
            recipient,
        })
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Best-effort send; false on any failure.
    pub async fn send_email(&self, subject: &str, body: &str, recipient: &str) -> bool {
        let smtp = self.smtp.clone();
        let host = self.host.clone();
        let (subject, body, to) = (subject.to_string(), body.to_string(), recipient.to_string());

        let task = tokio::task::spawn_blocking(move || send_blocking(&smtp, &host, &subject, &body, &to));
        // lettre enforces EMAIL_TIMEOUT per socket operation; this caps the whole exchange
        match tokio::time::timeout(EMAIL_TIMEOUT * 2, task).await {
            Ok(Ok(Ok(()))) => {
                info!(to = recipient, "alert email sent");
                true
            }
            Ok(Ok(Err(e))) => {
                warn!(to = recipient, error = %e, "alert email failed");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "alert email task failed");
                false
            }
            Err(_) => {
                warn!(to = recipient, "alert email timed out");
                false
            }
        }
    }
}

fn send_blocking(
    smtp: &SmtpConfig,
    host: &str,
    subject: &str,
    body: &str,
    to: &str,
) -> anyhow::Result<()> {
    let from: Mailbox = smtp
        .user
        .as_deref()
        .and_then(|u| u.parse().ok())
        .map_or_else(|| DEFAULT_FROM.parse(), Ok)
        .context("smtp from address is invalid")?;
    let to: Mailbox = to.parse().context("smtp to address is invalid")?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_string())
        .context("smtp message build failed")?;

    let builder = match smtp.tls {
        SmtpTls::None => SmtpTransport::builder_dangerous(host),
        SmtpTls::StartTls => {
            SmtpTransport::starttls_relay(host).context("smtp starttls relay init failed")?
        }
        SmtpTls::Tls => SmtpTransport::relay(host).context("smtp tls relay init failed")?,
    };
    let mut builder = builder.port(smtp.port).timeout(Some(EMAIL_TIMEOUT));
    if let (Some(user), Some(pass)) = (&smtp.user, &smtp.pass) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    builder.build().send(&message).context("smtp send failed")?;
    Ok(())
}

#[async_trait]
impl AlertSink for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, payload: &AlertPayload) -> bool {
        let body = match serde_json::to_string_pretty(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "alert payload serialization failed");
                return false;
            }
        };
        self.send_email(ALERT_SUBJECT, &body, &self.recipient).await
    }
}
