use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Prefix for issued token URLs (`{base_url}/c/{token}`). Not used on the hit path.
    pub base_url: String,
    /// Default token lifetime in seconds. 0 = tokens never expire.
    pub token_expiry_secs: u64,
    /// Hits admitted per token within `rate_limit_window_secs`.
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
    /// Take the first `X-Forwarded-For` hop as the client address.
    /// Spoofable by any direct client when not behind a trusted proxy.
    pub trust_forwarded_for: bool,
    pub reverse_dns: bool,
    pub reverse_dns_timeout_ms: u64,
    pub alert_webhook: Option<String>,
    pub alert_webhook_secret: Option<String>,
    pub alert_email: Option<String>,
    pub smtp: SmtpConfig,
    pub admin_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub tls: SmtpTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    None,
    StartTls,
    Tls,
}

impl SmtpTls {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starttls" => SmtpTls::StartTls,
            "tls" | "ssl" => SmtpTls::Tls,
            _ => SmtpTls::None,
        }
    }
}

impl Config {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn reverse_dns_timeout(&self) -> Duration {
        Duration::from_millis(self.reverse_dns_timeout_ms)
    }

    /// Build a config from an arbitrary variable lookup.
    /// Malformed numbers fall back to their defaults.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            non_empty(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        Config {
            host: non_empty("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: non_empty("APP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8443),
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/ssrf_canary".into()),
            base_url: non_empty("BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://canary.example.com".into()),
            token_expiry_secs: non_empty("TOKEN_EXPIRY_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60 * 60 * 24 * 7),
            rate_limit_max: non_empty("RATE_LIMIT_MAX")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            rate_limit_window_secs: non_empty("RATE_LIMIT_WINDOW")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            trust_forwarded_for: flag("TRUST_FORWARDED_FOR", true),
            reverse_dns: flag("REVERSE_DNS", true),
            reverse_dns_timeout_ms: non_empty("REVERSE_DNS_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            alert_webhook: non_empty("ALERT_WEBHOOK"),
            alert_webhook_secret: non_empty("ALERT_WEBHOOK_SECRET"),
            alert_email: non_empty("ALERT_EMAIL"),
            smtp: SmtpConfig {
                host: non_empty("SMTP_HOST"),
                port: non_empty("SMTP_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(25),
                user: non_empty("SMTP_USER"),
                pass: non_empty("SMTP_PASS"),
                tls: non_empty("SMTP_TLS")
                    .map(|v| SmtpTls::parse(&v))
                    .unwrap_or(SmtpTls::None),
            },
            admin_key: non_empty("CANARY_ADMIN_KEY"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_lookup(|key| std::env::var(key).ok());

    if cfg.rate_limit_window_secs == 0 {
        anyhow::bail!("RATE_LIMIT_WINDOW must be at least 1 second");
    }
    if cfg.admin_key.is_none() {
        tracing::warn!("CANARY_ADMIN_KEY is not set; administrative endpoints are unauthenticated");
    }

    Ok(cfg)
}
