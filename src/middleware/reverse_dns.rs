use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

/// Best-effort PTR lookup. Every failure mode (timeout, NXDOMAIN,
/// unparseable input) collapses to `None`.
#[async_trait]
pub trait ReverseResolver: Send + Sync {
    async fn resolve(&self, addr: &str) -> Option<String>;
}

/// Resolver backed by the system `getnameinfo`, bounded by a timeout.
///
/// The lookup runs on the blocking pool. When the timeout fires the
/// blocking call is abandoned, not cancelled; it finishes in the background.
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ReverseResolver for SystemResolver {
    async fn resolve(&self, addr: &str) -> Option<String> {
        let ip: IpAddr = addr.trim().parse().ok()?;

        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) if !name.is_empty() && name != ip.to_string() => Some(name),
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                tracing::debug!(addr, error = %e, "reverse lookup failed");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(addr, error = %e, "reverse lookup task failed");
                None
            }
            Err(_) => {
                tracing::debug!(addr, timeout_ms = self.timeout.as_millis() as u64, "reverse lookup timed out");
                None
            }
        }
    }
}

/// Resolver used when reverse DNS is disabled.
pub struct DisabledResolver;

#[async_trait]
impl ReverseResolver for DisabledResolver {
    async fn resolve(&self, _addr: &str) -> Option<String> {
        None
    }
}
