use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use super::{AlertPayload, AlertSink};

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` keyed by `secret`, formatted as `sha256=<hex>`.
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Posts alert payloads as JSON to a single URL.
///
/// One attempt per alert, bounded by [`WEBHOOK_TIMEOUT`]. When a signing
/// secret is configured the body is signed and the signature sent in
/// `x-canary-signature`.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, signing_secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("ssrf-canary/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default webhook client");
                reqwest::Client::new()
            });

        Self {
            client,
            url: url.into(),
            signing_secret,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one payload. Any non-2xx status is an error.
    pub async fn send(&self, payload: &AlertPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let delivery_id = uuid::Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .header("content-type", "application/json")
            .header("x-canary-delivery-id", &delivery_id)
            .header("x-canary-timestamp", chrono::Utc::now().timestamp().to_string());

        if let Some(sig) = self
            .signing_secret
            .as_deref()
            .and_then(|s| hmac_sha256_hex(s, &body))
        {
            req = req.header("x-canary-signature", sig);
        }

        let resp = req.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned status {}", status);
        }

        info!(
            url = %self.url,
            delivery_id = %delivery_id,
            status = %status,
            token = %payload.token,
            "webhook delivered"
        );
        Ok(())
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, payload: &AlertPayload) -> bool {
        match self.send(payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %self.url, error = %e, "webhook delivery failed");
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
